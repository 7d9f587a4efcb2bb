//! Time-partitioned batching.

use std::future::Future;
use std::time::Duration;

use crate::channel::Channel;
use crate::select::Select;
use crate::time::Timer;

enum Step<T> {
    Received(Option<T>),
    IdleFlush,
}

/// Groups values from `source` into batches of `group_size`, flushing a
/// partial batch once `idle_timeout` elapses after the last received value.
///
/// Returns the output channel (unbuffered, so a flush rendezvouses with
/// the consumer) and a driver future to spawn. The trailing partial batch
/// is flushed when the source closes; the output closes afterwards.
///
/// # Panics
///
/// Panics if `group_size` is zero.
pub fn partition_time<T: Send + 'static>(
    source: Channel<T>,
    group_size: usize,
    idle_timeout: Duration,
    timer: &Timer,
) -> (Channel<Vec<T>>, impl Future<Output = ()>) {
    assert!(group_size >= 1, "group size must be at least 1");

    let out = Channel::new(0);
    let driver_out = out.clone();
    let timer = timer.clone();
    let driver = async move {
        let mut group: Vec<T> = Vec::new();
        loop {
            if group.is_empty() {
                // Nothing pending: no idle clock runs until a value lands.
                match source.recv().await {
                    Some(value) => group.push(value),
                    None => break,
                }
            } else {
                // The idle clock restarts on every received value.
                let step = Select::new()
                    .recv("source", &source, Step::Received)
                    .deadline("idle", &timer, idle_timeout, || Step::IdleFlush)
                    .run()
                    .await;
                match step {
                    Ok(Step::Received(Some(value))) => group.push(value),
                    Ok(Step::Received(None)) => {
                        let _ = driver_out.send(std::mem::take(&mut group)).await;
                        break;
                    }
                    Ok(Step::IdleFlush) => {
                        if driver_out.send(std::mem::take(&mut group)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Err(_) => break,
                }
            }
            if group.len() >= group_size
                && driver_out.send(std::mem::take(&mut group)).await.is_err()
            {
                break;
            }
        }
        driver_out.close();
    };
    (out, driver)
}
