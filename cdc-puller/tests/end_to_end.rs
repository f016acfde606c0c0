//! Drives the puller against an in-memory fake of the upstream client,
//! covering the scenarios spec'd for a two-span subscription `A=[a,m)`,
//! `B=[m,z)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cdc_puller::{CdcClient, PullerConfig, RegionFeedEvent, RowMutation, Span, Ts};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use cdc_puller::Puller;

struct FakeClient {
    inputs: AsyncMutex<HashMap<Span, mpsc::UnboundedReceiver<RegionFeedEvent>>>,
}

impl FakeClient {
    fn new(feeds: Vec<(Span, mpsc::UnboundedReceiver<RegionFeedEvent>)>) -> Self {
        Self {
            inputs: AsyncMutex::new(feeds.into_iter().collect()),
        }
    }
}

#[async_trait]
impl CdcClient for FakeClient {
    async fn event_feed(
        &self,
        span: Span,
        _start_ts: Ts,
        out: mpsc::Sender<RegionFeedEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut rx = self
            .inputs
            .lock()
            .await
            .remove(&span)
            .expect("no scripted feed for span");

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => {
                        if out.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => {
                        // Script exhausted; a real feed stays open until
                        // cancelled rather than closing on its own.
                        cancel.cancelled().await;
                        return Ok(());
                    }
                },
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn close(&self) {}
}

fn span(start: &str, end: &str) -> Span {
    Span::new(start.as_bytes().to_vec(), end.as_bytes().to_vec())
}

fn val(key: &[u8], crts: Ts) -> RegionFeedEvent {
    RegionFeedEvent::Val(RowMutation::Put {
        key: Bytes::copy_from_slice(key),
        value: Bytes::from_static(b"v"),
        old_value: None,
        start_ts: crts.saturating_sub(1),
        crts,
        region_id: 1,
    })
}

fn resolved(span: Span, ts: Ts) -> RegionFeedEvent {
    RegionFeedEvent::Resolved { span, ts }
}

#[tokio::test]
async fn end_to_end_scenarios_match_the_two_span_walkthrough() {
    let a = span("a", "m");
    let b = span("m", "z");

    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    let client = FakeClient::new(vec![(a.clone(), rx_a), (b.clone(), rx_b)]);

    let puller = Arc::new(Puller::new(
        client,
        vec![a.clone(), b.clone()],
        0,
        PullerConfig::default(),
    ));
    let mut output = puller.sorted_output();

    let run_puller = Arc::clone(&puller);
    let run_handle = tokio::spawn(async move { run_puller.run().await });

    // S1
    tx_a.send(val(b"b", 10)).unwrap();
    tx_a.send(resolved(a.clone(), 20)).unwrap();
    tx_b.send(resolved(b.clone(), 15)).unwrap();

    let e1 = output.recv().await.unwrap();
    assert!(!e1.is_resolved());
    assert_eq!(e1.crts(), 10);

    let e2 = output.recv().await.unwrap();
    assert!(e2.is_resolved());
    assert_eq!(e2.crts(), 15);
    assert_eq!(puller.get_resolved_ts(), 15);

    // S2
    tx_b.send(resolved(b.clone(), 25)).unwrap();
    let e3 = output.recv().await.unwrap();
    assert!(e3.is_resolved());
    assert_eq!(e3.crts(), 20);
    assert_eq!(puller.get_resolved_ts(), 20);

    // S3: key "7" sorts before "a", so it's out of both spans and is
    // dropped at ingress; it must never appear on the output.
    tx_a.send(val(b"7", 30)).unwrap();

    // S4
    tx_a.send(val(b"c", 18)).unwrap();
    tx_a.send(val(b"d", 12)).unwrap();
    tx_a.send(resolved(a.clone(), 40)).unwrap();
    tx_b.send(resolved(b.clone(), 40)).unwrap();

    let e4 = output.recv().await.unwrap();
    assert_eq!(e4.crts(), 12);
    let e5 = output.recv().await.unwrap();
    assert_eq!(e5.crts(), 18);
    let e6 = output.recv().await.unwrap();
    assert!(e6.is_resolved());
    assert_eq!(e6.crts(), 40);
    assert_eq!(puller.get_resolved_ts(), 40);

    // S5: a duplicate Resolved(B,40) must not raise the frontier again or
    // emit a second marker for it.
    tx_b.send(resolved(b.clone(), 40)).unwrap();
    tx_a.send(val(b"e", 50)).unwrap();
    tx_a.send(resolved(a.clone(), 60)).unwrap();
    tx_b.send(resolved(b.clone(), 60)).unwrap();

    let e7 = output.recv().await.unwrap();
    assert_eq!(e7.crts(), 50);
    let e8 = output.recv().await.unwrap();
    assert!(e8.is_resolved());
    assert_eq!(e8.crts(), 60);
    assert_eq!(puller.get_resolved_ts(), 60);

    puller.cancellation_token().cancel();
    let joined = tokio::time::timeout(Duration::from_secs(1), run_handle)
        .await
        .expect("run should stop promptly once cancelled")
        .expect("run task must not panic");
    assert!(joined.is_ok());
}

#[tokio::test]
async fn run_returns_promptly_on_cancellation_while_backpressured() {
    let a = span("a", "z");
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let client = FakeClient::new(vec![(a.clone(), rx_a)]);

    let config = PullerConfig {
        mem_quota_hi_bytes: 64,
        mem_quota_lo_bytes: 32,
        chan_buffer_capacity: 1,
        event_channel_capacity: 1,
        ..PullerConfig::default()
    };

    let puller = Arc::new(Puller::new(client, vec![a.clone()], 0, config));
    // Deliberately never drained, so the pipeline backs up and blocks.
    let _output = puller.sorted_output();

    let run_puller = Arc::clone(&puller);
    let cancel = puller.cancellation_token();
    let run_handle = tokio::spawn(async move { run_puller.run().await });

    for i in 0..20u64 {
        let key = format!("k{i}");
        let _ = tx_a.send(val(key.as_bytes(), i));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let joined = tokio::time::timeout(Duration::from_millis(500), run_handle)
        .await
        .expect("run should return promptly after cancellation")
        .expect("run task must not panic");
    assert!(joined.is_ok());
}
