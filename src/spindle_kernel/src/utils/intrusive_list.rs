//! Intrusive doubly linked list backed by a container implementing
//! `core::ops::Index`.
//!
//! Elements are linked through `Cell`s embedded in the elements themselves, so
//! a list can be rearranged through a shared reference to the pool. This is
//! what lets the kernel keep a task in several lists at once (a wait queue,
//! the sleep set, another task's blocker list) without aliasing `&mut`.
use core::{cell::Cell, fmt, ops};

/// Circular linked list header.
#[derive(Copy, Clone)]
pub struct ListHead<Index> {
    pub first: Option<Index>,
}

impl<Index> Default for ListHead<Index> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Index: fmt::Debug> fmt::Debug for ListHead<Index> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?})", &self.first)
    }
}

impl<Index> ListHead<Index> {
    pub const fn new() -> Self {
        Self { first: None }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Links to neighbor items.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link<Index> {
    pub prev: Index,
    pub next: Index,
}

pub trait CellLike {
    type Target;

    fn get(&self) -> Self::Target;
    fn set(&self, value: Self::Target);

    #[inline]
    fn modify<T>(&self, f: impl FnOnce(&mut Self::Target) -> T) -> T
    where
        Self: Sized,
    {
        let mut x = self.get();
        let ret = f(&mut x);
        self.set(x);
        ret
    }
}

impl<Element: Copy> CellLike for Cell<Element> {
    type Target = Element;

    fn get(&self) -> Self::Target {
        Cell::get(self)
    }
    fn set(&self, value: Self::Target) {
        Cell::set(self, value);
    }
}

impl<Element: CellLike> CellLike for &Element {
    type Target = Element::Target;

    fn get(&self) -> Self::Target {
        (*self).get()
    }
    fn set(&self, value: Self::Target) {
        (*self).set(value);
    }
}

#[cold]
#[track_caller]
fn on_inconsistency() -> ! {
    panic!("linked list is inconsistent")
}

/// `Cell`-based accessor to a linked list.
///
/// Structural inconsistency is a broken kernel invariant and causes a panic.
#[derive(Debug)]
pub struct ListAccessorCell<'a, HeadCell, Pool, MapLink> {
    head: HeadCell,
    pool: &'a Pool,
    map_link: MapLink,
}

impl<'a, HeadCell, Index, Pool, MapLink, Element, LinkCell>
    ListAccessorCell<'a, HeadCell, Pool, MapLink>
where
    HeadCell: CellLike<Target = ListHead<Index>>,
    Pool: ops::Index<Index, Output = Element>,
    MapLink: Fn(&Element) -> &LinkCell,
    LinkCell: CellLike<Target = Option<Link<Index>>>,
    Index: PartialEq + Clone,
{
    pub fn new(head: HeadCell, pool: &'a Pool, map_link: MapLink) -> Self {
        ListAccessorCell {
            head,
            pool,
            map_link,
        }
    }

    pub fn head(&self) -> ListHead<Index> {
        self.head.get()
    }

    pub fn set_head(&mut self, head: ListHead<Index>) {
        self.head.set(head);
    }

    pub fn pool(&self) -> &'a Pool {
        self.pool
    }

    pub fn is_empty(&self) -> bool {
        self.head().is_empty()
    }

    fn link(&self, item: Index) -> Option<Link<Index>> {
        (self.map_link)(&self.pool[item]).get()
    }

    /// Return `true` if `item` is linked to some list (not necessarily this
    /// one).
    pub fn is_linked(&self, item: Index) -> bool {
        self.link(item).is_some()
    }

    #[inline]
    pub fn front(&self) -> Option<Index> {
        self.head().first
    }

    #[inline]
    pub fn back(&self) -> Option<Index> {
        self.head()
            .first
            .map(|p| self.link(p).unwrap_or_else(|| on_inconsistency()).prev)
    }

    #[inline]
    pub fn front_data(&self) -> Option<&'a Element> {
        let pool = self.pool;
        self.front().map(|p| &pool[p])
    }

    /// Insert `item` before the position `p` (if `at` is `Some(p)`) or to the
    /// the list's back (if `at` is `None`).
    ///
    /// # Panics
    ///
    /// Panics if `item` is already linked.
    pub fn insert(&mut self, item: Index, at: Option<Index>) {
        assert!(!self.is_linked(item.clone()), "item is already linked");

        let mut head = self.head();

        if let Some(first) = head.first {
            let (next, update_first) = if let Some(at) = at {
                let update_first = at == first;
                (at, update_first)
            } else {
                (first, false)
            };

            let prev = self
                .link(next.clone())
                .unwrap_or_else(|| on_inconsistency())
                .prev;

            // prev.next = item
            (self.map_link)(&self.pool[prev.clone()]).modify(|l| match l {
                Some(l) => l.next = item.clone(),
                None => on_inconsistency(),
            });

            // next.prev = item
            (self.map_link)(&self.pool[next.clone()]).modify(|l| match l {
                Some(l) => l.prev = item.clone(),
                None => on_inconsistency(),
            });

            (self.map_link)(&self.pool[item.clone()]).set(Some(Link { prev, next }));

            if update_first {
                head.first = Some(item);
                self.set_head(head);
            }
        } else {
            debug_assert!(at.is_none());

            (self.map_link)(&self.pool[item.clone()]).set(Some(Link {
                prev: item.clone(),
                next: item.clone(),
            }));

            head.first = Some(item);
            self.set_head(head);
        }
    }

    #[inline]
    pub fn push_back(&mut self, item: Index) {
        self.insert(item, None)
    }

    /// Remove `item` from the list. Returns `item`.
    ///
    /// # Panics
    ///
    /// Panics if `item` is not linked.
    pub fn remove(&mut self, item: Index) -> Index {
        let link = self
            .link(item.clone())
            .unwrap_or_else(|| panic!("item is not linked"));

        let mut head = self.head();
        if head.first.as_ref() == Some(&item) {
            if link.next == item {
                // The list just became empty
                head.first = None;
                self.set_head(head);
                (self.map_link)(&self.pool[item.clone()]).set(None);
                return item;
            }

            // Move the head pointer
            head.first = Some(link.next.clone());
            self.set_head(head);
        }

        // link.prev.next = link.next
        (self.map_link)(&self.pool[link.prev.clone()]).modify(|l| match l {
            Some(l) => l.next = link.next.clone(),
            None => on_inconsistency(),
        });

        // link.next.prev = link.prev
        (self.map_link)(&self.pool[link.next.clone()]).modify(|l| match l {
            Some(l) => l.prev = link.prev.clone(),
            None => on_inconsistency(),
        });

        (self.map_link)(&self.pool[item.clone()]).set(None);

        item
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<Index> {
        self.front().map(|item| self.remove(item))
    }

    /// Get the next element of the specified element.
    #[inline]
    pub fn next(&self, i: Index) -> Option<Index> {
        let next = self
            .link(i)
            .unwrap_or_else(|| panic!("item is not linked"))
            .next;
        if Some(&next) == self.head().first.as_ref() {
            None
        } else {
            Some(next)
        }
    }

    /// Get the previous element of the specified element.
    #[inline]
    pub fn prev(&self, i: Index) -> Option<Index> {
        if Some(&i) == self.head().first.as_ref() {
            None
        } else {
            Some(
                self.link(i)
                    .unwrap_or_else(|| panic!("item is not linked"))
                    .prev,
            )
        }
    }

    pub fn iter(&self) -> Iter<&Self, Index> {
        Iter {
            next: self.head().first,
            accessor: self,
        }
    }
}

/// An iterator over the elements of `ListAccessorCell`.
///
/// The iterator reads the successor lazily, so removing the element that was
/// just yielded invalidates it.
#[derive(Debug)]
pub struct Iter<Accessor, Index> {
    accessor: Accessor,
    next: Option<Index>,
}

impl<'a, 'b, HeadCell, Index, Pool, MapLink, Element, LinkCell> Iterator
    for Iter<&'b ListAccessorCell<'a, HeadCell, Pool, MapLink>, Index>
where
    HeadCell: CellLike<Target = ListHead<Index>>,
    Pool: ops::Index<Index, Output = Element>,
    MapLink: Fn(&Element) -> &LinkCell,
    Element: 'a,
    LinkCell: CellLike<Target = Option<Link<Index>>>,
    Index: PartialEq + Clone,
{
    type Item = (Index, &'a Element);

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next.take()?;
        self.next = self.accessor.next(next.clone());
        Some((next.clone(), &self.accessor.pool[next]))
    }
}
