//! Peer Server
//!
//! - accept 루프는 수락만 하고 연결마다 태스크를 띄운다
//! - 연결당 요청 하나, 응답 후 항상 연결 종료
//! - 동시 연결 수 제한 없음 (수락 제어 없음)

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::FileCatalog;
use crate::message::{encode_listing, Request, Status, MAX_REQUEST_LEN};
use crate::{Config, Error, Result};

/// 연결 상태
///
/// `AwaitingRequest → Dispatching → Streaming | RespondingError → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequest,
    Dispatching,
    Streaming,
    RespondingError,
    Closed,
}

impl ConnectionState {
    /// 연결 상태 기계에서 허용되는 전이인지
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (AwaitingRequest, Dispatching)
                | (AwaitingRequest, Closed)
                | (Dispatching, Streaming)
                | (Dispatching, RespondingError)
                | (Streaming, Closed)
                | (RespondingError, Closed)
        )
    }
}

/// 연결 정보
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub started_at: Instant,

    /// 거쳐 온 상태 (현재 상태 포함)
    pub path: Vec<ConnectionState>,
}

/// 최근 종료 연결 보관 수
const RECENT_SESSIONS: usize = 32;

/// Peer Server
pub struct PeerServer {
    /// 설정
    config: Config,

    /// 공유 폴더
    catalog: FileCatalog,

    /// 활성 연결 (연결 ID → 상태)
    sessions: DashMap<u64, SessionInfo>,

    /// 다음 연결 ID
    next_session_id: AtomicU64,

    /// 최근 종료된 연결 (오래된 것부터)
    recent: Mutex<VecDeque<SessionInfo>>,

    /// 전송한 파일 바이트 합계
    served_bytes: AtomicU64,

    /// 바인드된 주소 (accept 루프 실행 중일 때)
    local_addr: Mutex<Option<SocketAddr>>,
}

impl PeerServer {
    /// 새 서버 생성
    pub fn new(config: Config) -> Self {
        let catalog = FileCatalog::new(config.shared_dir.clone());
        Self {
            config,
            catalog,
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_SESSIONS)),
            served_bytes: AtomicU64::new(0),
            local_addr: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    /// 설정된 주소에 바인드
    pub async fn listen(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::connection(&addr, e))
    }

    /// 바인드 후 accept 루프 실행 (반환하지 않음)
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// 바인드 후 accept 루프를 백그라운드 태스크로 시작
    pub async fn start(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = self.listen().await?;
        let local_addr = listener.local_addr()?;
        let handle = tokio::spawn(self.serve(listener));
        Ok((local_addr, handle))
    }

    /// accept 루프
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!("Peer server listening on {}", local_addr);
        info!("Sharing directory: {:?}", self.catalog.root());

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // fd 고갈 등은 일시적일 수 있음
                    warn!("accept 실패: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, peer).await;
            });
        }
    }

    /// 활성 연결 목록
    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// 최근 종료된 연결 (오래된 것부터, 최대 32개)
    pub fn recent_sessions(&self) -> Vec<SessionInfo> {
        self.recent.lock().iter().cloned().collect()
    }

    /// accept 루프가 바인드한 주소
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// 전송한 파일 바이트 합계
    pub fn served_bytes(&self) -> u64 {
        self.served_bytes.load(Ordering::Relaxed)
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            id,
            SessionInfo {
                peer,
                state: ConnectionState::AwaitingRequest,
                started_at: Instant::now(),
                path: vec![ConnectionState::AwaitingRequest],
            },
        );
        debug!("연결 수락: #{} from {}", id, peer);

        if let Err(e) = self.process(id, stream).await {
            warn!("Connection error ({}): {}", peer, e);
        }

        self.set_state(id, ConnectionState::Closed);
        if let Some((_, session)) = self.sessions.remove(&id) {
            let mut recent = self.recent.lock();
            if recent.len() == RECENT_SESSIONS {
                recent.pop_front();
            }
            recent.push_back(session);
        }
        debug!("연결 종료: #{} ({})", id, peer);
    }

    /// 요청 하나 처리. stream은 반환 시 drop되어 닫힌다.
    async fn process(&self, id: u64, mut stream: TcpStream) -> Result<()> {
        let mut buf = [0u8; MAX_REQUEST_LEN];
        let len = stream.read(&mut buf).await?;
        if len == 0 {
            return Err(Error::ConnectionClosed);
        }

        self.set_state(id, ConnectionState::Dispatching);

        let result = match Request::parse(&buf[..len]) {
            Ok(Request::ListFiles) => {
                let names = self.catalog.list().await;
                debug!("LIST_FILES: {} files", names.len());
                self.set_state(id, ConnectionState::Streaming);
                stream.write_all(&encode_listing(&names)).await.map_err(Error::from)
            }
            Ok(Request::GetFile(filename)) => self.send_file(id, &mut stream, &filename).await,
            Err(e) => {
                debug!("잘못된 요청: {}", e);
                self.set_state(id, ConnectionState::RespondingError);
                stream
                    .write_all(&Status::invalid_command().to_bytes())
                    .await
                    .map_err(Error::from)
            }
        };

        // 응답 실패와 무관하게 FIN 전송 시도
        let _ = stream.shutdown().await;
        result
    }

    async fn send_file(&self, id: u64, stream: &mut TcpStream, filename: &str) -> Result<()> {
        let (file, len) = match self.catalog.open(filename).await {
            Ok(opened) => opened,
            Err(Error::NotFound { .. }) => {
                debug!("GET_FILE {}: not found", filename);
                self.set_state(id, ConnectionState::RespondingError);
                stream.write_all(&Status::not_found().to_bytes()).await?;
                return Ok(());
            }
            Err(e) => {
                self.set_state(id, ConnectionState::RespondingError);
                let _ = stream
                    .write_all(&Status::Error("Unable to read file".into()).to_bytes())
                    .await;
                return Err(e);
            }
        };

        self.set_state(id, ConnectionState::Streaming);
        stream.write_all(&Status::Ok.to_bytes()).await?;

        let start = Instant::now();
        let mut reader = BufReader::with_capacity(self.config.buffer_size.max(1), file);
        let sent = tokio::io::copy_buf(&mut reader, stream).await?;
        self.served_bytes.fetch_add(sent, Ordering::Relaxed);

        if sent != len {
            debug!("{}: 전송 중 파일 크기 변경 ({} → {} bytes)", filename, len, sent);
        }
        info!(
            "Sent {} ({} bytes) in {:.2}s",
            filename,
            sent,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn set_state(&self, id: u64, state: ConnectionState) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            if !session.state.can_transition_to(state) {
                warn!("연결 #{}: 잘못된 상태 전이 {:?} → {:?}", id, session.state, state);
            }
            session.state = state;
            session.path.push(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_server(dir: &std::path::Path) -> (Arc<PeerServer>, SocketAddr) {
        let config = Config::local_test(dir);
        std::fs::create_dir_all(&config.shared_dir).unwrap();
        let server = Arc::new(PeerServer::new(config));
        let (addr, _handle) = server.clone().start().await.unwrap();
        (server, addr)
    }

    /// 요청을 보내고 서버가 닫을 때까지 전부 읽음
    async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .expect("서버가 연결을 닫지 않음")
            .unwrap();
        response
    }

    #[tokio::test]
    async fn test_invalid_command_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, addr) = start_server(dir.path()).await;

        assert_eq!(exchange(addr, b"FOO_BAR").await, b"ERROR: Invalid command\n");
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr) = start_server(dir.path()).await;

        assert_eq!(exchange(addr, b"LIST_FILES").await, b"\n");

        let root = server.catalog().root().to_path_buf();
        std::fs::write(root.join("b.bin"), [0u8; 16]).unwrap();
        std::fs::write(root.join("a.txt"), b"hi").unwrap();
        assert_eq!(exchange(addr, b"LIST_FILES").await, b"a.txt\nb.bin\n");
    }

    #[tokio::test]
    async fn test_list_files_missing_shared_dir() {
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(PeerServer::new(Config::local_test(dir.path())));
        let (addr, _handle) = server.start().await.unwrap();

        assert_eq!(exchange(addr, b"LIST_FILES").await, b"\n");
    }

    #[tokio::test]
    async fn test_get_file() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr) = start_server(dir.path()).await;

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(server.catalog().root().join("report.pdf"), &payload).unwrap();

        let response = exchange(addr, b"GET_FILE report.pdf").await;
        assert_eq!(&response[..3], b"OK\n");
        assert_eq!(&response[3..], payload.as_slice());
        assert_eq!(server.served_bytes(), payload.len() as u64);
    }

    #[tokio::test]
    async fn test_get_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, addr) = start_server(dir.path()).await;

        assert_eq!(
            exchange(addr, b"GET_FILE missing.xyz").await,
            b"ERROR: File not found\n"
        );
        assert_eq!(
            exchange(addr, b"GET_FILE ../secret").await,
            b"ERROR: File not found\n"
        );
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(AwaitingRequest.can_transition_to(Dispatching));
        assert!(Dispatching.can_transition_to(Streaming));
        assert!(Dispatching.can_transition_to(RespondingError));
        assert!(Streaming.can_transition_to(Closed));
        assert!(!Dispatching.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(AwaitingRequest));
    }

    /// 연결 하나가 끝난 뒤 그 연결이 거친 상태
    async fn closed_path(server: &PeerServer, count: usize) -> Vec<ConnectionState> {
        for _ in 0..100 {
            let recent = server.recent_sessions();
            if recent.len() >= count {
                return recent[count - 1].path.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("연결이 정리되지 않음");
    }

    #[tokio::test]
    async fn test_session_paths_follow_state_machine() {
        use ConnectionState::*;
        let dir = tempfile::tempdir().unwrap();
        let (server, addr) = start_server(dir.path()).await;
        std::fs::write(server.catalog().root().join("a.txt"), b"hi").unwrap();

        exchange(addr, b"LIST_FILES").await;
        assert_eq!(
            closed_path(&server, 1).await,
            vec![AwaitingRequest, Dispatching, Streaming, Closed]
        );

        exchange(addr, b"GET_FILE a.txt").await;
        assert_eq!(
            closed_path(&server, 2).await,
            vec![AwaitingRequest, Dispatching, Streaming, Closed]
        );

        exchange(addr, b"GET_FILE missing.xyz").await;
        assert_eq!(
            closed_path(&server, 3).await,
            vec![AwaitingRequest, Dispatching, RespondingError, Closed]
        );

        exchange(addr, b"FOO_BAR").await;
        assert_eq!(
            closed_path(&server, 4).await,
            vec![AwaitingRequest, Dispatching, RespondingError, Closed]
        );
    }

    #[tokio::test]
    async fn test_sessions_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr) = start_server(dir.path()).await;

        // 요청 없이 닫힌 연결도 서버를 죽이지 않음
        drop(TcpStream::connect(addr).await.unwrap());
        exchange(addr, b"LIST_FILES").await;

        // 연결 정리는 응답 직후 비동기로 일어남
        for _ in 0..50 {
            if server.active_sessions().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server.active_sessions().is_empty());
    }
}
