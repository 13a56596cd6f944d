//! 노드 감독자
//!
//! Peer Server와 Discovery Responder를 장기 실행 태스크로 띄우고 종료를 관찰한다.
//! 태스크가 끝나면 재시작 정책에 따라 다시 띄우거나 그 태스크만 `Failed`로 둔다.
//! 모든 태스크가 실패해야 노드 전체가 실패로 끝난다.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::responder::DiscoveryResponder;
use crate::server::PeerServer;
use crate::{Config, Error, Result};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// 감독 대상 태스크
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    PeerServer,
    DiscoveryResponder,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::PeerServer, TaskKind::DiscoveryResponder];
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::PeerServer => f.write_str("peer-server"),
            TaskKind::DiscoveryResponder => f.write_str("discovery-responder"),
        }
    }
}

/// 태스크 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Restarting { attempt: u32 },
    Stopped,
    Failed(String),
}

/// 재시작 정책
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// 창 안에서 허용하는 최대 재시작 수 (0이면 재시작 안 함)
    pub max_restarts: u32,
    /// 재시작 횟수를 세는 시간 창
    pub window: Duration,
    /// 첫 재시작 대기 시간 (이후 2배씩)
    pub backoff: Duration,
    /// 최대 대기 시간
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    /// 재시작 없이 종료된 태스크를 `Failed`로 둔다
    fn default() -> Self {
        Self::never()
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_restarts,
            window,
            backoff,
            max_backoff,
        }
    }

    pub fn never() -> Self {
        Self::new(0, Duration::from_secs(60), Duration::ZERO, Duration::ZERO)
    }

    /// 일시적 실패용 (바인드 경합, 인터페이스 재설정 등)
    pub fn lenient() -> Self {
        Self::new(
            10,
            Duration::from_secs(60),
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }
}

/// 태스크별 재시작 기록
#[derive(Debug)]
struct RestartTracker {
    policy: RestartPolicy,
    restart_times: VecDeque<Instant>,
    consecutive_restarts: u32,
}

impl RestartTracker {
    fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restart_times: VecDeque::new(),
            consecutive_restarts: 0,
        }
    }

    /// 재시작 허용 시 대기 시간, 한도 초과 시 None
    fn record_restart(&mut self) -> Option<Duration> {
        let now = Instant::now();

        while let Some(front) = self.restart_times.front() {
            if now.duration_since(*front) > self.policy.window {
                self.restart_times.pop_front();
            } else {
                break;
            }
        }

        if self.restart_times.len() >= self.policy.max_restarts as usize {
            return None;
        }

        self.restart_times.push_back(now);
        self.consecutive_restarts += 1;

        let multiplier = 2u32.saturating_pow(self.consecutive_restarts - 1);
        Some(
            self.policy
                .backoff
                .saturating_mul(multiplier)
                .min(self.policy.max_backoff),
        )
    }

    fn attempts(&self) -> u32 {
        self.consecutive_restarts
    }
}

/// 노드 감독자
pub struct Supervisor {
    config: Config,
    server: Arc<PeerServer>,
    responder: Arc<DiscoveryResponder>,
    policy: RestartPolicy,
    states: Arc<RwLock<HashMap<TaskKind, TaskState>>>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            server: Arc::new(PeerServer::new(config.clone())),
            responder: Arc::new(DiscoveryResponder::new(config.clone())),
            config,
            policy: RestartPolicy::default(),
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn server(&self) -> &Arc<PeerServer> {
        &self.server
    }

    /// 태스크 상태
    pub fn state(&self, kind: TaskKind) -> Option<TaskState> {
        self.states.read().get(&kind).cloned()
    }

    pub fn states(&self) -> Vec<(TaskKind, TaskState)> {
        TaskKind::ALL
            .iter()
            .filter_map(|kind| self.state(*kind).map(|state| (*kind, state)))
            .collect()
    }

    /// 프로세스가 끝날 때까지 실행
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// `shutdown`이 끝나거나 모든 태스크가 재시작 한도를 넘을 때까지 실행
    ///
    /// 정상 종료면 Ok, 살아 있는 태스크가 하나도 남지 않으면 마지막으로 실패한 태스크의 `TaskFailed`.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.config.ensure_shared_dir()?;

        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<(TaskKind, String)>();
        let mut handles: HashMap<TaskKind, AbortHandle> = HashMap::new();
        let mut trackers: HashMap<TaskKind, RestartTracker> = HashMap::new();

        for kind in TaskKind::ALL {
            handles.insert(kind, self.spawn(kind, exit_tx.clone()));
        }
        info!("Node started ({} tasks)", handles.len());

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some((kind, reason)) = exit_rx.recv() => {
                    warn!("{} stopped: {}", kind, reason);

                    let tracker = trackers
                        .entry(kind)
                        .or_insert_with(|| RestartTracker::new(self.policy.clone()));

                    match tracker.record_restart() {
                        Some(backoff) => {
                            self.set_state(kind, TaskState::Restarting { attempt: tracker.attempts() });
                            info!("Restarting {} in {:?} (attempt {})", kind, backoff, tracker.attempts());

                            tokio::select! {
                                _ = &mut shutdown => break Ok(()),
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            handles.insert(kind, self.spawn(kind, exit_tx.clone()));
                        }
                        None => {
                            // 이 기능만 멈추고 나머지 태스크는 계속 실행
                            self.set_state(kind, TaskState::Failed(reason.clone()));
                            handles.remove(&kind);

                            if handles.is_empty() {
                                break Err(Error::TaskFailed {
                                    task: kind.to_string(),
                                    reason,
                                });
                            }
                            warn!("{} disabled, {} task(s) still running", kind, handles.len());
                        }
                    }
                }
            }
        };

        for handle in handles.values() {
            handle.abort();
        }
        {
            let mut states = self.states.write();
            for state in states.values_mut() {
                if !matches!(state, TaskState::Failed(_)) {
                    *state = TaskState::Stopped;
                }
            }
        }

        result
    }

    /// 태스크 시작 + 종료 감시
    fn spawn(&self, kind: TaskKind, exit_tx: mpsc::UnboundedSender<(TaskKind, String)>) -> AbortHandle {
        let task: TaskFuture = match kind {
            TaskKind::PeerServer => Box::pin(self.server.clone().run()),
            TaskKind::DiscoveryResponder => Box::pin(self.responder.clone().run()),
        };

        let handle = tokio::spawn(task);
        let abort = handle.abort_handle();
        self.set_state(kind, TaskState::Running);

        tokio::spawn(async move {
            let reason = match handle.await {
                Ok(Ok(())) => "exited".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_cancelled() => return,
                Err(e) => format!("panic: {}", e),
            };
            let _ = exit_tx.send((kind, reason));
        });

        abort
    }

    fn set_state(&self, kind: TaskKind, state: TaskState) {
        self.states.write().insert(kind, state);
    }
}
