mod delayable;
mod fifo;
mod traits;

pub use delayable::DelayableContainer;
pub use fifo::FifoContainer;
pub use traits::QueueContainer;

use crate::queue::QueueType;

/// Build the container matching a queue's ordering policy.
pub fn container_for(queue_type: QueueType) -> Box<dyn QueueContainer> {
    match queue_type {
        QueueType::SequentialFifo => Box::new(FifoContainer::new()),
        QueueType::SequentialDelayable => Box::new(DelayableContainer::new()),
    }
}
