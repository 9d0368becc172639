//! Cross-crate integration flows, all on the in-memory transports.

#[cfg(test)]
mod bus_flows;
#[cfg(test)]
mod runtime_flows;
#[cfg(test)]
mod stream_flows;

/// Poll `check` until it holds or `within` elapses.
#[cfg(test)]
pub(crate) async fn eventually<F>(within: std::time::Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
