//! 피어 클라이언트 (목록 조회 + 다운로드)
//!
//! - 피어 이름은 호스트 레지스트리로 해석, 포트는 설정값
//! - 접속과 응답 헤더 수신에만 타임아웃
//! - 헤더는 `\n`까지 한 바이트씩 읽고, 나머지는 연결이 닫힐 때까지 파일로 스트리밍
//! - 실패한 다운로드의 부분 파일은 지우지 않는다. 잘린 파일 정리는 호출자 몫.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::catalog::FileCatalog;
use crate::message::{decode_listing, Request, Status, MAX_STATUS_LEN};
use crate::registry::HostRegistry;
use crate::stats::{Progress, TransferStats, TransferSummary};
use crate::{Config, Error, Result};

/// 다운로드 한 건의 상태
struct TransferSession {
    peer: SocketAddr,
    filename: String,
    stats: TransferStats,
}

/// 피어 클라이언트
pub struct PeerClient {
    config: Config,
    registry: Arc<HostRegistry>,
    catalog: FileCatalog,
}

impl PeerClient {
    pub fn new(config: Config, registry: Arc<HostRegistry>) -> Self {
        let catalog = FileCatalog::new(config.shared_dir.clone());
        Self {
            config,
            registry,
            catalog,
        }
    }

    /// 원격 피어의 공유 파일 목록
    pub async fn list_remote(&self, peer: &str) -> Result<Vec<String>> {
        let mut stream = self.connect(peer).await?;
        let addr = stream.peer_addr()?;

        stream
            .write_all(&Request::ListFiles.to_bytes())
            .await
            .map_err(|e| Error::connection(addr, e))?;

        let timeout = self.config.connect_timeout();
        let mut body = Vec::new();
        match tokio::time::timeout(timeout, stream.read_to_end(&mut body)).await {
            Err(_) => return Err(Error::timeout(addr, timeout)),
            Ok(Err(e)) => return Err(Error::connection(addr, e)),
            Ok(Ok(_)) => {}
        }

        let files = decode_listing(&body)?;
        debug!("{}: {} remote files", addr, files.len());
        Ok(files)
    }

    /// 진행률 없이 다운로드
    pub async fn fetch(&self, peer: &str, filename: &str) -> Result<TransferSummary> {
        self.fetch_with_progress(peer, filename, |_| {}).await
    }

    /// 파일 다운로드
    ///
    /// 공유 폴더에 같은 이름으로 저장한다. 샘플 간격(기본 0.5초)이 지날 때마다
    /// `on_progress`로 (누적 바이트, 순간 KB/s)를 넘긴다.
    /// 서버 에러 응답이면 로컬 파일을 만들지 않는다.
    pub async fn fetch_with_progress<F>(
        &self,
        peer: &str,
        filename: &str,
        mut on_progress: F,
    ) -> Result<TransferSummary>
    where
        F: FnMut(Progress) + Send,
    {
        let dest = self
            .catalog
            .path_of(filename)
            .ok_or_else(|| Error::InvalidRequest(format!("잘못된 파일명: {:?}", filename)))?;

        let mut stream = self.connect(peer).await?;
        let addr = stream.peer_addr()?;

        stream
            .write_all(&Request::GetFile(filename.to_string()).to_bytes())
            .await
            .map_err(|e| Error::connection(addr, e))?;

        let timeout = self.config.connect_timeout();
        let status_line = tokio::time::timeout(timeout, read_status_line(&mut stream))
            .await
            .map_err(|_| Error::timeout(addr, timeout))??;
        Status::parse(&status_line)?.into_result(filename)?;

        let mut session = TransferSession {
            peer: addr,
            filename: filename.to_string(),
            stats: TransferStats::new(self.config.progress_interval()),
        };
        info!("Downloading '{}' from {}", session.filename, session.peer);

        let file = create_destination(dest).await?;
        receive_into(&mut stream, file, &mut session, self.config.buffer_size, &mut on_progress)
            .await?;

        let summary = session.stats.finish(&session.filename);
        info!("Download complete: {}", summary.summary());
        Ok(summary)
    }

    /// 피어 이름 해석 후 접속 (타임아웃 포함)
    async fn connect(&self, peer: &str) -> Result<TcpStream> {
        let host = self.registry.resolve(peer).await;
        let port = self.config.bind_port;
        let target = format!("{}:{}", host, port);
        let timeout = self.config.connect_timeout();

        debug!("{} → {}", peer, target);

        match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
            Err(_) => Err(Error::timeout(target, timeout)),
            Ok(Err(e)) => Err(Error::connection(target, e)),
            Ok(Ok(stream)) => Ok(stream),
        }
    }
}

/// 상태 줄을 `\n`까지 한 바이트씩 읽음 (본문 바이트는 소비하지 않는다)
async fn read_status_line(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(32);
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        line.push(byte[0]);
        if byte[0] == b'\n' {
            return Ok(line);
        }
        if line.len() >= MAX_STATUS_LEN {
            return Err(Error::InvalidResponse(format!(
                "상태 줄이 {} bytes를 넘음",
                MAX_STATUS_LEN
            )));
        }
    }
}

async fn create_destination(dest: PathBuf) -> Result<File> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(File::create(&dest).await?)
}

/// 연결이 닫힐 때까지 파일로 스트리밍
async fn receive_into<F>(
    stream: &mut TcpStream,
    mut file: File,
    session: &mut TransferSession,
    buffer_size: usize,
    on_progress: &mut F,
) -> Result<()>
where
    F: FnMut(Progress) + Send,
{
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                // 받은 부분까지는 디스크에 남긴다
                let _ = file.flush().await;
                return Err(Error::connection(session.peer, e));
            }
        };
        if n == 0 {
            break;
        }

        file.write_all(&buf[..n]).await?;
        if let Some(progress) = session.stats.record(n) {
            on_progress(progress);
        }
    }

    file.flush().await?;
    Ok(())
}
