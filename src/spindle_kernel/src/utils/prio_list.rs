//! Priority-ordered intrusive list
//!
//! The list is kept sorted by descending priority. Items of equal priority
//! keep their arrival order, so popping from the front serves them
//! round-robin.
use core::ops;

use super::intrusive_list::{CellLike, Iter, Link, ListAccessorCell, ListHead};

/// An accessor to a [`ListAccessorCell`]-style list whose elements are
/// ordered by the key `MapPrio` extracts.
#[derive(Debug)]
pub struct PrioListAccessor<'a, HeadCell, Pool, MapLink, MapPrio> {
    list: ListAccessorCell<'a, HeadCell, Pool, MapLink>,
    map_prio: MapPrio,
}

impl<'a, HeadCell, Index, Pool, MapLink, MapPrio, Element, LinkCell, Prio>
    PrioListAccessor<'a, HeadCell, Pool, MapLink, MapPrio>
where
    HeadCell: CellLike<Target = ListHead<Index>>,
    Pool: ops::Index<Index, Output = Element>,
    MapLink: Fn(&Element) -> &LinkCell,
    MapPrio: Fn(&Element) -> Prio,
    LinkCell: CellLike<Target = Option<Link<Index>>>,
    Index: PartialEq + Clone,
    Prio: Ord,
{
    pub fn new(head: HeadCell, pool: &'a Pool, map_link: MapLink, map_prio: MapPrio) -> Self {
        Self {
            list: ListAccessorCell::new(head, pool, map_link),
            map_prio,
        }
    }

    #[inline]
    fn prio(&self, i: Index) -> Prio {
        (self.map_prio)(&self.list.pool()[i])
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Get the item with the highest priority.
    pub fn front(&self) -> Option<Index> {
        self.list.front()
    }

    pub fn front_data(&self) -> Option<&'a Element> {
        self.list.front_data()
    }

    pub fn iter(&self) -> Iter<&ListAccessorCell<'a, HeadCell, Pool, MapLink>, Index> {
        self.list.iter()
    }

    /// Insert `item` after every item whose priority is higher than or equal
    /// to that of `item`.
    ///
    /// The search starts at the back because a new arrival usually belongs
    /// near it.
    pub fn push(&mut self, item: Index) {
        let p = self.prio(item.clone());
        let mut at = None;
        let mut cursor = self.list.back();
        while let Some(c) = cursor {
            if self.prio(c.clone()) >= p {
                break;
            }
            cursor = self.list.prev(c.clone());
            at = Some(c);
        }
        self.list.insert(item, at);
    }

    /// Remove and return the item with the highest priority.
    pub fn pop_front(&mut self) -> Option<Index> {
        self.list.pop_front()
    }

    pub fn remove(&mut self, item: Index) -> Index {
        self.list.remove(item)
    }

    /// Reposition `item` after its priority was raised. Only the items in
    /// front of it are examined.
    pub fn increase(&mut self, item: Index) {
        let p = self.prio(item.clone());
        let mut at = None;
        let mut cursor = self.list.prev(item.clone());
        while let Some(c) = cursor {
            if self.prio(c.clone()) >= p {
                break;
            }
            cursor = self.list.prev(c.clone());
            at = Some(c);
        }
        if let Some(at) = at {
            self.list.remove(item.clone());
            self.list.insert(item, Some(at));
        }
    }

    /// Reposition `item` after its priority was lowered. Only the items behind
    /// it are examined. `item` ends up behind the items of equal priority.
    pub fn decrease(&mut self, item: Index) {
        let p = self.prio(item.clone());
        let mut moved = false;
        let mut cursor = self.list.next(item.clone());
        while let Some(c) = cursor.clone() {
            if self.prio(c.clone()) < p {
                break;
            }
            moved = true;
            cursor = self.list.next(c);
        }
        if moved {
            self.list.remove(item.clone());
            self.list.insert(item, cursor);
        }
    }

    /// Reposition `item` after a change in its priority in either direction.
    pub fn reposition(&mut self, item: Index) {
        let p = self.prio(item.clone());
        match self.list.prev(item.clone()) {
            Some(prev) if self.prio(prev.clone()) < p => self.increase(item),
            _ => self.decrease(item),
        }
    }
}
