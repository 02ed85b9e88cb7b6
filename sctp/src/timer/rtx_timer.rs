use std::fmt;
use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};

/// RTO bounds and smoothing constants, RFC 4960 sec 6.3.1 / 15.
pub(crate) const RTO_INITIAL: f64 = 3000.0;
pub(crate) const RTO_MIN: f64 = 1000.0;
pub(crate) const RTO_MAX: f64 = 60000.0;
pub(crate) const RTO_ALPHA: f64 = 0.125;
pub(crate) const RTO_BETA: f64 = 0.25;

pub(crate) const MAX_INIT_RETRANS: usize = 8;
pub(crate) const MAX_SHUTDOWN_RETRANS: usize = 10;
/// no bound; the timer keeps firing until stopped
pub(crate) const NO_MAX_RETRANS: usize = 0;

/// Keeps the smoothed RTT estimate and derives the retransmission timeout
/// (RFC 4960 sec 6.3.1). Measurements only come from chunks sent exactly
/// once (Karn's algorithm), which the association enforces.
#[derive(Default, Debug)]
pub(crate) struct RtoManager {
    pub(crate) srtt: f64,
    pub(crate) rttvar: f64,
    pub(crate) rto: f64,
}

impl RtoManager {
    pub(crate) fn new() -> Self {
        RtoManager {
            rto: RTO_INITIAL,
            ..Default::default()
        }
    }

    /// Feeds one RTT measurement (ms) and returns the new SRTT.
    pub(crate) fn set_new_rtt(&mut self, rtt: u64) -> u64 {
        let rtt = rtt as f64;
        if self.srtt == 0.0 {
            // first measurement
            self.srtt = rtt;
            self.rttvar = rtt / 2.0;
        } else {
            self.rttvar = (1.0 - RTO_BETA) * self.rttvar + RTO_BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt;
        }
        self.rto = (self.srtt + 4.0 * self.rttvar).clamp(RTO_MIN, RTO_MAX);

        self.srtt as u64
    }

    pub(crate) fn get_rto(&self) -> u64 {
        self.rto as u64
    }

    pub(crate) fn reset(&mut self) {
        self.srtt = 0.0;
        self.rttvar = 0.0;
        self.rto = RTO_INITIAL;
    }
}

/// Backoff: the RTO doubles on every consecutive expiry, capped at RTO_MAX.
pub(crate) fn calculate_next_timeout(rto: u64, n_rtos: usize) -> u64 {
    if n_rtos < 31 {
        std::cmp::min(rto << n_rtos, RTO_MAX as u64)
    } else {
        RTO_MAX as u64
    }
}

/// Retransmission timer identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum RtxTimerId {
    #[default]
    T1Init,
    T1Cookie,
    T2Shutdown,
    T3Rtx,
    Reconfig,
}

impl fmt::Display for RtxTimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RtxTimerId::T1Init => "T1Init",
            RtxTimerId::T1Cookie => "T1Cookie",
            RtxTimerId::T2Shutdown => "T2Shutdown",
            RtxTimerId::T3Rtx => "T3Rtx",
            RtxTimerId::Reconfig => "Reconfig",
        };
        write!(f, "{s}")
    }
}

#[async_trait]
pub(crate) trait RtxTimerObserver {
    async fn on_retransmission_timeout(&mut self, id: RtxTimerId, n_rtos: usize);
    async fn on_retransmission_failure(&mut self, id: RtxTimerId);
}

/// A countdown that fires `on_retransmission_timeout` with exponential
/// backoff until stopped, or `on_retransmission_failure` once the bounded
/// attempt count is exhausted. The observer is held weakly so a dropped
/// association silently retires its timers.
#[derive(Default, Debug)]
pub(crate) struct RtxTimer<T: 'static + RtxTimerObserver + Send> {
    pub(crate) timeout_observer: Weak<Mutex<T>>,
    pub(crate) id: RtxTimerId,
    pub(crate) max_retrans: usize,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl<T: 'static + RtxTimerObserver + Send> RtxTimer<T> {
    pub(crate) fn new(timeout_observer: Weak<Mutex<T>>, id: RtxTimerId, max_retrans: usize) -> Self {
        RtxTimer {
            timeout_observer,
            id,
            max_retrans,
            close_tx: Mutex::new(None),
        }
    }

    /// Arms the timer with the given RTO. A no-op if already running.
    pub(crate) async fn start(&self, rto: u64) -> bool {
        let mut close_tx = self.close_tx.lock().await;
        if close_tx.is_some() {
            return false;
        }

        let (tx, mut close_rx) = mpsc::channel(1);
        let id = self.id;
        let max_retrans = self.max_retrans;
        let timeout_observer = self.timeout_observer.clone();

        tokio::spawn(async move {
            let mut n_rtos = 0usize;
            loop {
                let interval = calculate_next_timeout(rto, n_rtos);
                let timer = sleep(Duration::from_millis(interval));
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {}
                    _ = close_rx.recv() => break,
                }

                n_rtos += 1;

                let observer = match timeout_observer.upgrade() {
                    Some(observer) => observer,
                    None => break,
                };

                if max_retrans > 0 && n_rtos > max_retrans {
                    let mut observer = observer.lock().await;
                    observer.on_retransmission_failure(id).await;
                    break;
                }

                let mut observer = observer.lock().await;
                observer.on_retransmission_timeout(id, n_rtos).await;
            }
        });

        *close_tx = Some(tx);
        true
    }

    /// Disarms the timer; a later `start` re-arms it from scratch.
    pub(crate) async fn stop(&self) {
        let mut close_tx = self.close_tx.lock().await;
        close_tx.take();
    }
}
