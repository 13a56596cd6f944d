//! 프로토콜 메시지 정의
//!
//! 전송 프로토콜은 텍스트 기반이며 연결당 요청 하나만 처리한다.
//!
//! ```text
//! client → server   LIST_FILES
//! client → server   GET_FILE <filename>
//! server → client   <name1>\n<name2>\n...\n        (빈 목록도 "\n")
//! server → client   OK\n<raw bytes ... EOF>
//! server → client   ERROR: <reason>\n
//! ```
//!
//! GET_FILE 응답에는 길이 필드가 없다. `OK\n` 이후 서버가 연결을 닫는 것이 파일 끝이다.
//!
//! 디스커버리는 UDP 데이터그램 하나씩 주고받는다.
//!
//! ```text
//! client → group    DISCOVER_P2P
//! responder → client <name>|<ip>
//! ```

use std::fmt;
use std::net::IpAddr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// 목록 요청 명령
pub const LIST_FILES: &str = "LIST_FILES";

/// 파일 요청 명령 (뒤에 공백 하나 + 파일명)
pub const GET_FILE: &str = "GET_FILE";

/// 성공 상태 줄
pub const OK_LINE: &[u8] = b"OK\n";

/// 에러 상태 줄 접두사
pub const ERROR_PREFIX: &str = "ERROR: ";

/// 서버 에러 사유
pub const FILE_NOT_FOUND: &str = "File not found";
pub const INVALID_COMMAND: &str = "Invalid command";

/// 요청은 단일 recv로 읽는다
pub const MAX_REQUEST_LEN: usize = 1024;

/// 응답 상태 줄 최대 길이
pub const MAX_STATUS_LEN: usize = 1024;

/// 디스커버리 프로브 페이로드
pub const DISCOVERY_PROBE: &[u8] = b"DISCOVER_P2P";

/// 디스커버리 응답 구분자
const REPLY_SEPARATOR: char = '|';

/// 클라이언트 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// 공유 파일 목록
    ListFiles,

    /// 파일 다운로드
    GetFile(String),
}

impl Request {
    /// 요청 바이트 파싱
    ///
    /// 끝의 줄바꿈은 있어도 없어도 된다. 인식할 수 없으면 `InvalidRequest`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::InvalidRequest("UTF-8이 아닌 요청".into()))?
            .trim();

        if text == LIST_FILES {
            return Ok(Request::ListFiles);
        }

        if let Some(filename) = text
            .strip_prefix(GET_FILE)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            let filename = filename.trim();
            if !filename.is_empty() {
                return Ok(Request::GetFile(filename.to_string()));
            }
        }

        Err(Error::InvalidRequest(truncate_for_log(text)))
    }

    /// 와이어 바이트로 직렬화 (줄바꿈 없음)
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Request::ListFiles => Bytes::from_static(LIST_FILES.as_bytes()),
            Request::GetFile(filename) => {
                let mut buf = BytesMut::with_capacity(GET_FILE.len() + 1 + filename.len());
                buf.put_slice(GET_FILE.as_bytes());
                buf.put_u8(b' ');
                buf.put_slice(filename.as_bytes());
                buf.freeze()
            }
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::ListFiles => f.write_str(LIST_FILES),
            Request::GetFile(filename) => write!(f, "{} {}", GET_FILE, filename),
        }
    }
}

/// GET_FILE 응답 상태 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// `OK\n` 이후 파일 바이트
    Ok,

    /// `ERROR: <reason>\n`
    Error(String),
}

impl Status {
    pub fn not_found() -> Self {
        Status::Error(FILE_NOT_FOUND.to_string())
    }

    pub fn invalid_command() -> Self {
        Status::Error(INVALID_COMMAND.to_string())
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Status::Ok => Bytes::from_static(OK_LINE),
            Status::Error(reason) => {
                let mut buf = BytesMut::with_capacity(ERROR_PREFIX.len() + reason.len() + 1);
                buf.put_slice(ERROR_PREFIX.as_bytes());
                buf.put_slice(reason.as_bytes());
                buf.put_u8(b'\n');
                buf.freeze()
            }
        }
    }

    /// 상태 줄 파싱 (`\n` 포함 여부 무관)
    pub fn parse(line: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);

        if text == "OK" {
            return Ok(Status::Ok);
        }
        if let Some(reason) = text.strip_prefix(ERROR_PREFIX) {
            return Ok(Status::Error(reason.trim().to_string()));
        }
        if let Some(reason) = text.strip_prefix("ERROR") {
            return Ok(Status::Error(reason.trim_start_matches(':').trim().to_string()));
        }

        Err(Error::InvalidResponse(truncate_for_log(text)))
    }

    /// 에러 상태를 타입 있는 에러로 변환
    pub fn into_result(self, filename: &str) -> Result<()> {
        match self {
            Status::Ok => Ok(()),
            Status::Error(reason) => Err(remote_error(reason, filename)),
        }
    }
}

/// 서버 에러 사유 → 클라이언트 에러
pub(crate) fn remote_error(reason: String, filename: &str) -> Error {
    match reason.as_str() {
        FILE_NOT_FOUND => Error::NotFound {
            filename: filename.to_string(),
        },
        INVALID_COMMAND => Error::InvalidRequest(reason),
        _ => Error::Remote(reason),
    }
}

/// LIST_FILES 응답 본문 생성
pub fn encode_listing<S: AsRef<str>>(filenames: &[S]) -> Bytes {
    let len: usize = filenames.iter().map(|f| f.as_ref().len() + 1).sum();
    let mut buf = BytesMut::with_capacity(len.max(1));

    for (i, name) in filenames.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\n');
        }
        buf.put_slice(name.as_ref().as_bytes());
    }
    buf.put_u8(b'\n');
    buf.freeze()
}

/// LIST_FILES 응답 본문 파싱
///
/// 빈 줄은 무시하므로 `"\n"`은 빈 목록이다. 한 줄짜리 `ERROR:` 응답은 에러로 변환한다.
/// 여러 줄 본문은 항상 목록이므로 `ERROR: `로 시작하는 파일명도 그대로 받는다.
/// 단, 그런 이름의 파일 하나만 있는 목록은 에러 응답과 구별할 수 없다.
pub fn decode_listing(body: &[u8]) -> Result<Vec<String>> {
    let text = String::from_utf8_lossy(body);

    let single_line = !text.trim_end_matches(['\r', '\n']).contains('\n');
    if single_line {
        if let Some(reason) = text.strip_prefix(ERROR_PREFIX) {
            return Err(remote_error(reason.trim().to_string(), ""));
        }
    }

    Ok(text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// 디스커버리로 알게 된 피어
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity {
    /// 표시 이름 (호스트명)
    pub name: String,

    /// 응답에 실린 주소
    pub address: IpAddr,
}

impl PeerIdentity {
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }

    /// 디스커버리 응답 바이트 (`name|ip`)
    pub fn to_reply_bytes(&self) -> Bytes {
        Bytes::from(format!("{}{}{}", self.name, REPLY_SEPARATOR, self.address))
    }

    /// 디스커버리 응답 파싱. 형식이 맞지 않으면 None
    pub fn from_reply(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?.trim();
        let (name, ip) = text.split_once(REPLY_SEPARATOR)?;
        let name = name.trim();
        if name.is_empty() || ip.contains(REPLY_SEPARATOR) {
            return None;
        }
        let address = ip.trim().parse().ok()?;
        Some(Self::new(name, address))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 64;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse(b"LIST_FILES").unwrap(), Request::ListFiles);
        assert_eq!(Request::parse(b"LIST_FILES\n").unwrap(), Request::ListFiles);
        assert_eq!(
            Request::parse(b"GET_FILE report.pdf").unwrap(),
            Request::GetFile("report.pdf".into())
        );
        assert_eq!(
            Request::parse(b"GET_FILE my notes.txt\r\n").unwrap(),
            Request::GetFile("my notes.txt".into())
        );
    }

    #[test]
    fn test_parse_invalid_requests() {
        for input in [
            &b"FOO_BAR"[..],
            b"",
            b"GET_FILE",
            b"GET_FILE   ",
            b"GET_FILEreport.pdf",
            b"\xff\xfe",
        ] {
            assert!(
                matches!(Request::parse(input), Err(Error::InvalidRequest(_))),
                "{:?}",
                input
            );
        }
    }

    #[test]
    fn test_request_wire_format() {
        assert_eq!(Request::ListFiles.to_bytes().as_ref(), b"LIST_FILES");
        assert_eq!(
            Request::GetFile("a b.txt".into()).to_bytes().as_ref(),
            b"GET_FILE a b.txt"
        );
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(Status::Ok.to_bytes().as_ref(), b"OK\n");
        assert_eq!(
            Status::not_found().to_bytes().as_ref(),
            b"ERROR: File not found\n"
        );
        assert_eq!(
            Status::invalid_command().to_bytes().as_ref(),
            b"ERROR: Invalid command\n"
        );

        assert_eq!(Status::parse(b"OK\n").unwrap(), Status::Ok);
        assert_eq!(Status::parse(b"ERROR: File not found\n").unwrap(), Status::not_found());
        assert!(matches!(Status::parse(b"HTTP/1.1 200\n"), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn test_status_into_result() {
        assert!(Status::Ok.into_result("a").is_ok());
        assert!(matches!(
            Status::not_found().into_result("missing.xyz"),
            Err(Error::NotFound { filename }) if filename == "missing.xyz"
        ));
        assert!(matches!(
            Status::invalid_command().into_result("a"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            Status::Error("disk on fire".into()).into_result("a"),
            Err(Error::Remote(reason)) if reason == "disk on fire"
        ));
    }

    #[test]
    fn test_listing() {
        let body = encode_listing(&["a.txt", "b.bin"]);
        assert_eq!(body.as_ref(), b"a.txt\nb.bin\n");
        assert_eq!(decode_listing(&body).unwrap(), vec!["a.txt", "b.bin"]);

        let empty = encode_listing::<&str>(&[]);
        assert_eq!(empty.as_ref(), b"\n");
        assert!(decode_listing(&empty).unwrap().is_empty());
        assert!(decode_listing(b"").unwrap().is_empty());

        assert!(matches!(
            decode_listing(b"ERROR: Invalid command\n"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_listing_with_error_like_filename() {
        let body = encode_listing(&["ERROR: x", "b.txt"]);
        assert_eq!(decode_listing(&body).unwrap(), vec!["ERROR: x", "b.txt"]);
    }

    #[test]
    fn test_discovery_reply() {
        let peer = PeerIdentity::new("alpha", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
        let bytes = peer.to_reply_bytes();
        assert_eq!(bytes.as_ref(), b"alpha|192.168.1.10");
        assert_eq!(PeerIdentity::from_reply(&bytes), Some(peer));

        assert_eq!(PeerIdentity::from_reply(b"DISCOVER_P2P"), None);
        assert_eq!(PeerIdentity::from_reply(b"alpha|not-an-ip"), None);
        assert_eq!(PeerIdentity::from_reply(b"|10.0.0.1"), None);
        assert_eq!(PeerIdentity::from_reply(b"a|b|10.0.0.1"), None);
    }
}
