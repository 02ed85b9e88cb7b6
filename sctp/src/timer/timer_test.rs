use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::ack_timer::*;
use super::rtx_timer::*;

#[test]
fn test_rto_manager_initial_value() {
    let mgr = RtoManager::new();
    assert_eq!(mgr.get_rto(), RTO_INITIAL as u64);
}

#[test]
fn test_rto_manager_converges_on_stable_rtt() {
    let mut mgr = RtoManager::new();
    // constant 600ms RTT: srtt converges to 600, rto to the RTO_MIN floor
    for _ in 0..100 {
        mgr.set_new_rtt(600);
    }
    assert_eq!(mgr.srtt as u64, 600);
    assert_eq!(mgr.get_rto(), RTO_MIN as u64);
}

#[test]
fn test_rto_manager_first_measurement() {
    let mut mgr = RtoManager::new();
    let srtt = mgr.set_new_rtt(400);
    assert_eq!(srtt, 400);
    // rto = srtt + 4 * rttvar = 400 + 4 * 200
    assert_eq!(mgr.get_rto(), 1200);
}

#[test]
fn test_rto_manager_reset() {
    let mut mgr = RtoManager::new();
    mgr.set_new_rtt(100);
    mgr.reset();
    assert_eq!(mgr.get_rto(), RTO_INITIAL as u64);
    assert_eq!(mgr.srtt as u64, 0);
}

#[test]
fn test_calculate_next_timeout_doubles_and_caps() {
    assert_eq!(calculate_next_timeout(1000, 0), 1000);
    assert_eq!(calculate_next_timeout(1000, 1), 2000);
    assert_eq!(calculate_next_timeout(1000, 2), 4000);
    assert_eq!(calculate_next_timeout(1000, 6), 60000);
    assert_eq!(calculate_next_timeout(1000, 63), 60000);
}

struct TestObserver {
    timeout_tx: mpsc::Sender<(RtxTimerId, usize)>,
    failure_tx: mpsc::Sender<RtxTimerId>,
    ack_tx: Option<mpsc::Sender<()>>,
}

#[async_trait]
impl RtxTimerObserver for TestObserver {
    async fn on_retransmission_timeout(&mut self, id: RtxTimerId, n_rtos: usize) {
        let _ = self.timeout_tx.send((id, n_rtos)).await;
    }

    async fn on_retransmission_failure(&mut self, id: RtxTimerId) {
        let _ = self.failure_tx.send(id).await;
    }
}

#[async_trait]
impl AckTimerObserver for TestObserver {
    async fn on_ack_timeout(&mut self) {
        if let Some(ack_tx) = &self.ack_tx {
            let _ = ack_tx.send(()).await;
        }
    }
}

fn new_observer() -> (
    Arc<Mutex<TestObserver>>,
    mpsc::Receiver<(RtxTimerId, usize)>,
    mpsc::Receiver<RtxTimerId>,
    mpsc::Receiver<()>,
) {
    let (timeout_tx, timeout_rx) = mpsc::channel(16);
    let (failure_tx, failure_rx) = mpsc::channel(16);
    let (ack_tx, ack_rx) = mpsc::channel(16);
    let observer = Arc::new(Mutex::new(TestObserver {
        timeout_tx,
        failure_tx,
        ack_tx: Some(ack_tx),
    }));
    (observer, timeout_rx, failure_rx, ack_rx)
}

#[tokio::test]
async fn test_rtx_timer_fires_with_increasing_counts() {
    let (observer, mut timeout_rx, _failure_rx, _ack_rx) = new_observer();

    let timer = RtxTimer::new(Arc::downgrade(&observer), RtxTimerId::T3Rtx, NO_MAX_RETRANS);
    assert!(timer.start(10).await);
    assert!(!timer.start(10).await, "already armed");

    let (id, n1) = timeout_rx.recv().await.unwrap();
    assert_eq!(id, RtxTimerId::T3Rtx);
    let (_, n2) = timeout_rx.recv().await.unwrap();
    assert_eq!(n1, 1);
    assert_eq!(n2, 2);

    timer.stop().await;
}

#[tokio::test]
async fn test_rtx_timer_failure_after_max_retrans() {
    let (observer, mut timeout_rx, mut failure_rx, _ack_rx) = new_observer();

    let timer = RtxTimer::new(Arc::downgrade(&observer), RtxTimerId::T1Init, 2);
    assert!(timer.start(5).await);

    assert_eq!(timeout_rx.recv().await.unwrap().1, 1);
    assert_eq!(timeout_rx.recv().await.unwrap().1, 2);
    assert_eq!(failure_rx.recv().await.unwrap(), RtxTimerId::T1Init);

    // no further timeouts after failure
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(timeout_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rtx_timer_stop_prevents_fire() {
    let (observer, mut timeout_rx, _failure_rx, _ack_rx) = new_observer();

    let timer = RtxTimer::new(Arc::downgrade(&observer), RtxTimerId::T2Shutdown, NO_MAX_RETRANS);
    assert!(timer.start(50).await);
    timer.stop().await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(timeout_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_ack_timer_fires_once_per_start() {
    let (observer, _timeout_rx, _failure_rx, mut ack_rx) = new_observer();

    let mut timer = AckTimer::new(Arc::downgrade(&observer), Duration::from_millis(20));
    assert!(timer.start());
    assert!(timer.is_running());
    assert!(!timer.start(), "already running");

    ack_rx.recv().await.unwrap();

    // one-shot: nothing further until re-armed
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(ack_rx.try_recv().is_err());
}
