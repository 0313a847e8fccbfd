//! Request-reply exchanges over a channel. A server handling a request works
//! at the priority of its client.
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use spindle_kernel::{ChannelId, Priority, System, TaskAttr, TaskState};
use spindle_port_std::PortInstance;

const SERVER: Priority = 2;
const URGENT: Priority = 6;

static CHANNEL: OnceCell<ChannelId> = OnceCell::new();

/// The requests the server handled and its priority while handling them
static LOG: SpinMutex<Vec<(Vec<u8>, Priority)>> = SpinMutex::new(Vec::new());

fn channel() -> ChannelId {
    *CHANNEL.get().unwrap()
}

fn server<Traits: PortInstance>(rounds: usize) -> usize {
    let mut buf = [0u8; 16];
    for _ in 0..rounds {
        let len = System::<Traits>::channel_recv(channel(), &mut buf).unwrap();
        let priority = System::<Traits>::task_get_priority(None).unwrap();
        LOG.lock().push((buf[..len].to_vec(), priority));

        let reply = buf[..len].to_ascii_uppercase();
        System::<Traits>::channel_reply(channel(), &reply).unwrap();
    }
    rounds
}

fn urgent_client<Traits: PortInstance>(_: usize) -> usize {
    let mut reply = [0u8; 16];
    let len = System::<Traits>::channel_send(channel(), b"hurry", &mut reply).unwrap();
    assert_eq!(&reply[..len], b"HURRY");
    len
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    CHANNEL
        .set(System::<Traits>::channel_create().unwrap())
        .unwrap();

    let server =
        System::<Traits>::task_create(&TaskAttr::new(server::<Traits>, 3, SERVER)).unwrap();
    assert_eq!(System::<Traits>::task_state(server).unwrap(), TaskState::ChannelRecv);

    let mut reply = [0u8; 16];
    let len = System::<Traits>::channel_send(channel(), b"ping", &mut reply).unwrap();
    assert_eq!(&reply[..len], b"PING");

    // The client preempts us, and the server preempts nobody while serving it
    let client =
        System::<Traits>::task_create(&TaskAttr::new(urgent_client::<Traits>, 0, URGENT)).unwrap();
    assert_eq!(System::<Traits>::task_state(client).unwrap(), TaskState::Zombie);
    assert_eq!(System::<Traits>::task_get_priority(Some(server)).unwrap(), SERVER);

    // An empty exchange
    assert_eq!(System::<Traits>::channel_send(channel(), b"", &mut []).unwrap(), 0);

    assert_eq!(System::<Traits>::task_wait(Some(client)).unwrap(), (client, 5));
    assert_eq!(System::<Traits>::task_wait(Some(server)).unwrap(), (server, 3));

    assert_eq!(
        *LOG.lock(),
        [
            (b"ping".to_vec(), SERVER),
            (b"hurry".to_vec(), URGENT),
            (Vec::new(), SERVER),
        ]
    );

    crate::SUCCESS
}
