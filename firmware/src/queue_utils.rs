use heapless::spsc::Consumer;

/// Drain the queue, keeping only the newest item. Older frames are stale
/// by the time the consumer gets to run.
pub fn dequeue_last<T, const N: usize>(consumer: &mut Consumer<'static, T, N>) -> Option<T> {
    let mut newest = None;
    while let Some(item) = consumer.dequeue() {
        newest = Some(item);
    }
    newest
}

pub fn warn_about_capacity<T, const N: usize>(name: &str, consumer: &mut Consumer<'static, T, N>) {
    let len = consumer.len();
    let capacity = consumer.capacity();
    if len > capacity / 2 {
        defmt::warn!(
            "Queue={:?} is above the half of its capacity {:?}/{:?}",
            name,
            len,
            capacity
        );
    }
}
