//! 전송 통계
//!
//! 다운로드 한 건(TransferSession) 동안의 누적 바이트와 순간/평균 처리율.

use std::time::{Duration, Instant};

/// 진행률 샘플
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// 지금까지 받은 바이트
    pub bytes_so_far: u64,

    /// 직전 샘플 이후 처리율 (KB/s, 1 KB = 1024 bytes)
    pub instantaneous_kbps: f64,
}

/// 전송 완료 요약
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub filename: String,

    /// 받은 총 바이트
    pub bytes: u64,

    /// 경과 시간
    pub elapsed: Duration,

    /// 평균 처리율 (KB/s)
    pub average_kbps: f64,
}

impl TransferSummary {
    /// 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "{}: {:.1} KB in {:.2}s | Average: {:.1} KB/s",
            self.filename,
            self.bytes as f64 / 1024.0,
            self.elapsed.as_secs_f64(),
            self.average_kbps,
        )
    }
}

/// 다운로드 세션 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 누적 수신 바이트
    pub bytes_received: u64,

    /// 마지막 샘플 시간
    last_sample_time: Instant,

    /// 마지막 샘플 시점의 누적 바이트
    last_sample_bytes: u64,

    /// 샘플 최소 간격
    sample_interval: Duration,
}

impl TransferStats {
    pub fn new(sample_interval: Duration) -> Self {
        Self::started_at(Instant::now(), sample_interval)
    }

    pub(crate) fn started_at(start: Instant, sample_interval: Duration) -> Self {
        Self {
            start_time: start,
            bytes_received: 0,
            last_sample_time: start,
            last_sample_bytes: 0,
            sample_interval,
        }
    }

    /// 수신 기록. 샘플 간격이 지났으면 진행률 샘플 반환
    pub fn record(&mut self, bytes: usize) -> Option<Progress> {
        self.record_at(Instant::now(), bytes)
    }

    pub(crate) fn record_at(&mut self, now: Instant, bytes: usize) -> Option<Progress> {
        self.bytes_received += bytes as u64;

        let dt = now.duration_since(self.last_sample_time);
        if dt < self.sample_interval || dt.is_zero() {
            return None;
        }

        let delta = self.bytes_received - self.last_sample_bytes;
        let instantaneous_kbps = delta as f64 / dt.as_secs_f64() / 1024.0;

        self.last_sample_time = now;
        self.last_sample_bytes = self.bytes_received;

        Some(Progress {
            bytes_so_far: self.bytes_received,
            instantaneous_kbps,
        })
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 평균 처리율 (KB/s)
    pub fn average_kbps(&self) -> f64 {
        average_kbps(self.bytes_received, self.elapsed())
    }

    /// 완료 요약 생성
    pub fn finish(&self, filename: &str) -> TransferSummary {
        let elapsed = self.elapsed();
        TransferSummary {
            filename: filename.to_string(),
            bytes: self.bytes_received,
            elapsed,
            average_kbps: average_kbps(self.bytes_received, elapsed),
        }
    }
}

fn average_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    bytes as f64 / 1024.0 / secs
}

/// 진행률을 crossbeam 채널로 넘기는 콜백
///
/// UI 스레드(비동기 런타임 밖)에서 진행률을 받을 때 사용. 수신측이 사라지면 조용히 버린다.
pub fn forward_to(tx: crossbeam_channel::Sender<Progress>) -> impl FnMut(Progress) + Send {
    move |progress| {
        let _ = tx.try_send(progress);
    }
}
