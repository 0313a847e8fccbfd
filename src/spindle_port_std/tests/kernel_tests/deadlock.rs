//! Waiting for a message nobody sends leaves only the idle task, which
//! reports a deadlock.
use spindle_kernel::System;
use spindle_port_std::PortInstance;

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let channel = System::<Traits>::channel_create().unwrap();
    System::<Traits>::channel_recv(channel, &mut [0u8; 4]).unwrap();
    unreachable!()
}
