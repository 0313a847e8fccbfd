//! A message longer than the receiver's buffer is fatal.
use once_cell::sync::OnceCell;
use spindle_kernel::{ChannelId, System, TaskAttr};
use spindle_port_std::PortInstance;

static CHANNEL: OnceCell<ChannelId> = OnceCell::new();

fn server<Traits: PortInstance>(_: usize) -> usize {
    let mut buf = [0u8; 2];
    System::<Traits>::channel_recv(*CHANNEL.get().unwrap(), &mut buf).unwrap();
    0
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let channel = System::<Traits>::channel_create().unwrap();
    CHANNEL.set(channel).unwrap();
    System::<Traits>::task_create(&TaskAttr::new(server::<Traits>, 0, 2)).unwrap();

    System::<Traits>::channel_send(channel, b"too long", &mut []).unwrap();
    unreachable!()
}
