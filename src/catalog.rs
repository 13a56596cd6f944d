//! 공유 폴더 카탈로그
//!
//! 목록은 캐시하지 않고 요청마다 디렉터리를 다시 읽는다.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tracing::{debug, warn};

use crate::{Error, Result};

/// 공유 폴더 카탈로그
#[derive(Debug, Clone)]
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 현재 공유 중인 파일 이름 목록 (이름 순)
    ///
    /// 폴더가 없으면 빈 목록. 일반 파일만 포함하며 와이어로 표현할 수 없는
    /// 이름(UTF-8 아님, 줄바꿈 포함)은 건너뛴다.
    pub async fn list(&self) -> Vec<String> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("공유 폴더 읽기 실패 {:?}: {}", self.root, e);
                return Vec::new();
            }
        };

        let mut names = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("공유 폴더 항목 읽기 실패 {:?}: {}", self.root, e);
                    break;
                }
            };

            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                debug!("UTF-8이 아닌 파일명 제외: {:?}", entry.file_name());
                continue;
            };
            if !is_safe_filename(&name) {
                continue;
            }

            // 심볼릭 링크는 대상 기준
            match tokio::fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_file() => names.push(name),
                _ => {}
            }
        }

        names.sort();
        names
    }

    /// 공유 폴더 안의 경로 계산. 폴더 밖을 가리키는 이름이면 None
    pub fn path_of(&self, filename: &str) -> Option<PathBuf> {
        is_safe_filename(filename).then(|| self.root.join(filename))
    }

    /// 공유 파일 열기 (파일, 크기)
    ///
    /// 존재 확인과 이후 읽기는 원자적이지 않다. 그 사이 삭제되면 스트리밍 중 I/O 에러로 나타난다.
    pub async fn open(&self, filename: &str) -> Result<(File, u64)> {
        let not_found = || Error::NotFound {
            filename: filename.to_string(),
        };

        let path = self.path_of(filename).ok_or_else(not_found)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }

        let file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => not_found(),
            _ => Error::Io(e),
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

/// 공유 폴더 바로 아래의 단일 파일명인지 검사
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0', '\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::new(dir.path().join("not-created-yet"));
        assert!(catalog.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::new(dir.path());
        assert!(catalog.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_regular_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), b"\x00\x01").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let catalog = FileCatalog::new(dir.path());
        assert_eq!(catalog.list().await, vec!["a.txt", "b.bin"]);
    }

    #[test]
    fn test_safe_filename() {
        assert!(is_safe_filename("report.pdf"));
        assert!(is_safe_filename("with space.txt"));
        assert!(!is_safe_filename(""));
        assert!(!is_safe_filename(".."));
        assert!(!is_safe_filename("../etc/passwd"));
        assert!(!is_safe_filename("dir/file"));
        assert!(!is_safe_filename("dir\\file"));
    }

    #[tokio::test]
    async fn test_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let catalog = FileCatalog::new(dir.path());

        let (_file, len) = catalog.open("a.txt").await.unwrap();
        assert_eq!(len, 5);

        for name in ["missing.xyz", "subdir", "../a.txt"] {
            assert!(
                matches!(catalog.open(name).await, Err(Error::NotFound { .. })),
                "{name}"
            );
        }
    }
}
