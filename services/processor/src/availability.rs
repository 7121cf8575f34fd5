//! Remote availability probes.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use tracing::{debug, info};
use wx_common::RunKey;

use crate::config::ModelConfig;
use crate::fetch::Transport;

/// How far back to look for a published cycle.
const LOOKBACK_HOURS: i64 = 12;

/// HEAD probe; any error counts as absent.
pub async fn check_file_exists(transport: &dyn Transport, url: &str) -> bool {
    match transport.exists(url).await {
        Ok(exists) => exists,
        Err(e) => {
            debug!(url = %url, error = %e, "Availability probe failed");
            false
        }
    }
}

/// Newest cycle whose first mirror serves forecast hour 0 of the primary
/// file category. Cycles are tried hourly, newest first, starting
/// `delay_hours` before `now`.
pub async fn latest_available_cycle(
    transport: &dyn Transport,
    model: &ModelConfig,
    now: DateTime<Utc>,
) -> Option<RunKey> {
    let start = now - Duration::hours(model.schedule.delay_hours as i64);
    let start = start.duration_trunc(Duration::hours(1)).unwrap_or(start);
    let category = &model.processing.primary_file_type;

    for back in 0..LOOKBACK_HOURS {
        let cycle = start - Duration::hours(back);
        if !model.schedule.cycles.contains(&cycle.hour()) {
            continue;
        }
        let run = RunKey::new(model.model.clone(), cycle);
        let Some(url) = model.urls(&run.step(0), category).into_iter().next() else {
            continue;
        };
        if check_file_exists(transport, &url).await {
            info!(run = %run, "Latest available cycle");
            return Some(run);
        }
    }
    None
}

/// Longest forecast expected for `run`.
pub fn max_forecast_hour(model: &ModelConfig, run: &RunKey) -> u32 {
    model.max_forecast_hour(run.cycle_hour())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use test_utils::MODEL_CONFIG_YAML;
    use tokio_util::sync::CancellationToken;

    /// Serves HEAD for URLs containing any of `present`; logs every probe.
    struct HeadOnly {
        present: Vec<&'static str>,
        probes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for HeadOnly {
        async fn download(&self, _: &str, _: &Path, _: &CancellationToken) -> anyhow::Result<u64> {
            anyhow::bail!("not served")
        }

        async fn exists(&self, url: &str) -> anyhow::Result<bool> {
            self.probes.lock().unwrap().push(url.to_string());
            Ok(self.present.iter().any(|p| url.contains(p)))
        }
    }

    #[tokio::test]
    async fn test_latest_cycle_skips_unpublished() {
        let model: ModelConfig = serde_yaml::from_str(MODEL_CONFIG_YAML).unwrap();
        let transport = HeadOnly {
            present: vec!["hrrr.t06z.wrfprsf00"],
            probes: Mutex::new(Vec::new()),
        };
        // 14:20 minus a 2 h delay starts at 12z, which is not published yet.
        let now = Utc.with_ymd_and_hms(2025, 12, 10, 14, 20, 0).unwrap();

        let run = latest_available_cycle(&transport, &model, now).await.unwrap();
        assert_eq!(run.cycle_str(), "2025121006");
        assert_eq!(transport.probes.lock().unwrap().len(), 2);
        assert_eq!(max_forecast_hour(&model, &run), 18);
    }

    #[tokio::test]
    async fn test_no_cycle_found() {
        let model: ModelConfig = serde_yaml::from_str(MODEL_CONFIG_YAML).unwrap();
        let transport = HeadOnly {
            present: Vec::new(),
            probes: Mutex::new(Vec::new()),
        };
        let now = Utc.with_ymd_and_hms(2025, 12, 10, 14, 20, 0).unwrap();
        assert!(latest_available_cycle(&transport, &model, now).await.is_none());
    }
}
