mod stream;

pub use stream::{EventHandler, EventStream, StreamSubscriber};
