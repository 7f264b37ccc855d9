use std::time::Duration;

/// Retries `attempt` until it succeeds, sleeping between attempts with a
/// doubling delay clamped to `max_delay`. There is no attempt cap: the
/// supervisor's main loop is meant to retry forever until a connection is
/// established, mirroring the shape of
/// `pageserver/src/control_plane_client.rs`'s `retry_http_forever` (which
/// retries a control-plane call until cancellation) but without a
/// cancellation token, since the supervisor has no shutdown primitive in
/// this crate's scope.
pub async fn retry_forever<F, Fut, T, E>(
    base_delay: Duration,
    max_delay: Duration,
    mut on_failure: impl FnMut(&E, Duration),
    mut attempt: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut delay = base_delay;
    loop {
        match attempt().await {
            Ok(value) => return value,
            Err(err) => {
                on_failure(&err, delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}
