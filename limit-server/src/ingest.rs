//! UDP report receiver.
//!
//! One task per bound socket. Each datagram is decoded into a
//! [`BucketReport`], stamped with the sender's address and queued for the
//! aggregator. The queue is bounded; a full queue makes the receiver wait.

use crate::logging::REPORT_TARGET;
use crate::server::ControlMetrics;
use edge_limit_types::{BucketReport, TypesError};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

/// Decode one datagram. The reporting server is the sender's IP address.
pub fn decode_datagram(bytes: &[u8], src: SocketAddr) -> Result<BucketReport, TypesError> {
    let mut report = BucketReport::from_json(bytes)?;
    report.server_addr = src.ip().to_string();
    Ok(report)
}

/// Spawn a receiver on `socket` feeding `tx`.
///
/// Stops when `shutdown` becomes `true` or the aggregator side of the queue
/// is gone.
pub fn spawn_ingest(
    socket: UdpSocket,
    tx: mpsc::Sender<BucketReport>,
    metrics: Arc<ControlMetrics>,
    max_datagram_size: usize,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; max_datagram_size.max(1)];
        let local = socket.local_addr().ok();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let (len, src) = tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("UDP receive error: {}", e);
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let report = match decode_datagram(&buf[..len], src) {
                Ok(report) => report,
                Err(e) => {
                    metrics.reports_malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropping malformed report from {}: {}", src, e);
                    continue;
                }
            };
            metrics.reports_received.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: REPORT_TARGET,
                server = %report.server_addr,
                bucket = %report.bucket_name,
                time = report.timestamp,
                rate = report.observed_rate,
                conn = report.observed_conn,
                conn_peak = report.observed_conn_peak,
                qps = report.observed_qps.total,
                "report"
            );

            metrics.report_queue_depth.fetch_add(1, Ordering::Relaxed);
            if tx.send(report).await.is_err() {
                metrics.report_queue_depth.fetch_sub(1, Ordering::Relaxed);
                tracing::warn!("Aggregator gone, stopping receiver");
                break;
            }
        }

        if let Some(addr) = local {
            tracing::info!("Receiver on {} stopped", addr);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const REPORT: &[u8] = br#"{
        "bucket_name": "images",
        "time_stamp": 1700000000,
        "server_addr": "spoofed",
        "statistic_bucket_rate": 100.0,
        "statistic_bucket_qps": {"qps_total": 7.0}
    }"#;

    #[test]
    fn decode_uses_sender_address() {
        let src: SocketAddr = "10.1.2.3:40000".parse().unwrap();

        let report = decode_datagram(REPORT, src).unwrap();

        assert_eq!(report.server_addr, "10.1.2.3");
        assert_eq!(report.bucket_name, "images");
        assert_eq!(report.observed_qps.total, 7.0);
    }

    #[test]
    fn decode_rejects_garbage() {
        let src: SocketAddr = "10.1.2.3:40000".parse().unwrap();
        assert!(decode_datagram(b"not json", src).is_err());
        assert!(decode_datagram(br#"{"bucket_name":"","time_stamp":1}"#, src).is_err());
    }

    async fn receiver() -> (
        SocketAddr,
        mpsc::Receiver<BucketReport>,
        Arc<ControlMetrics>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let metrics = Arc::new(ControlMetrics::default());
        let (stop, shutdown) = watch::channel(false);
        let task = spawn_ingest(socket, tx, metrics.clone(), 4096, shutdown);
        (addr, rx, metrics, stop, task)
    }

    #[tokio::test]
    async fn datagrams_are_queued_and_garbage_counted() {
        let (addr, mut rx, metrics, stop, task) = receiver().await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        sender.send_to(b"{broken", addr).await.unwrap();
        sender.send_to(REPORT, addr).await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.server_addr, "127.0.0.1");
        assert_eq!(metrics.reports_received.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.reports_malformed.load(Ordering::Relaxed), 1);

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn receiver_stops_when_queue_is_closed() {
        let (addr, rx, _metrics, _stop, task) = receiver().await;
        drop(rx);

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(REPORT, addr).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
