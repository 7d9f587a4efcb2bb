//! Fan-in: merge several channels into one.

use std::future::Future;

use crate::channel::Channel;
use crate::select::Select;

/// Merges `sources` into a single output channel of the given capacity.
///
/// Returns the output channel and a driver future; the driver must be
/// spawned for values to flow. Each round races a receive across every
/// remaining source (fair tie-break via `select`), forwards the value with
/// backpressure, and drops sources as they close. The output closes when
/// every source has drained, or when the consumer closes the output.
pub fn merge<T: Send + 'static>(
    sources: Vec<Channel<T>>,
    output_capacity: usize,
) -> (Channel<T>, impl Future<Output = ()>) {
    let out = Channel::new(output_capacity);
    let driver_out = out.clone();
    let driver = async move {
        let mut sources = sources;
        while !sources.is_empty() {
            let mut race = Select::new();
            for (index, source) in sources.iter().enumerate() {
                race = race.recv("source", source, move |value| (index, value));
            }
            // Receive arms cannot fail and no caller token is attached.
            let Ok((index, value)) = race.run().await else {
                break;
            };
            match value {
                Some(value) => {
                    if driver_out.send(value).await.is_err() {
                        break;
                    }
                }
                None => {
                    sources.remove(index);
                }
            }
        }
        driver_out.close();
    };
    (out, driver)
}
