//! 에러 타입 정의

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// lanshare 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 요청한 파일이 공유 폴더에 없음
    #[error("파일 없음: {filename}")]
    NotFound { filename: String },

    /// 해석할 수 없는 요청 (알 수 없는 명령 포함)
    #[error("유효하지 않은 요청: {0}")]
    InvalidRequest(String),

    #[error("연결 실패: {addr}: {source}")]
    ConnectionFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("타임아웃: {addr} ({after:?})")]
    Timeout { addr: String, after: Duration },

    /// 응답 헤더를 다 받기 전에 연결이 닫힘
    #[error("연결 종료")]
    ConnectionClosed,

    /// 이름 해석 실패. 레지스트리는 이 에러를 내지 않고 이름을 그대로 돌려준다.
    #[error("이름 해석 실패: {0}")]
    ResolutionFailure(String),

    #[error("레지스트리 파일 에러: {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 서버가 보낸 그 밖의 `ERROR:` 응답
    #[error("원격 에러: {0}")]
    Remote(String),

    #[error("유효하지 않은 응답: {0}")]
    InvalidResponse(String),

    #[error("설정 에러: {0}")]
    Config(String),

    #[error("태스크 종료: {task} ({reason})")]
    TaskFailed { task: String, reason: String },
}

impl Error {
    pub(crate) fn connection(addr: impl ToString, source: std::io::Error) -> Self {
        Error::ConnectionFailure {
            addr: addr.to_string(),
            source,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn timeout(addr: impl ToString, after: Duration) -> Self {
        Error::Timeout {
            addr: addr.to_string(),
            after,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
