use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use kana_core::provider::BillingSource;
use kana_store::kv::keys;
use kana_store::KvRepo;

#[derive(Clone, Debug)]
pub struct GaugeConfig {
    pub token_limit: u64,
    /// USD per day.
    pub daily_budget: f64,
    pub cost_refresh_interval: Duration,
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            token_limit: 100_000,
            daily_budget: 1.0,
            cost_refresh_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Critical,
    Warning,
    Nominal,
}

impl Tier {
    pub fn of(ratio: f64) -> Self {
        if ratio < 0.2 {
            Self::Critical
        } else if ratio < 0.5 {
            Self::Warning
        } else {
            Self::Nominal
        }
    }
}

/// Token and spend counters with their caps, and the steering hint derived from them.
#[derive(Clone, Debug)]
pub struct ResourceGauge {
    config: GaugeConfig,
    tokens_used: u64,
    spent_today: f64,
}

pub type SharedGauge = Arc<RwLock<ResourceGauge>>;

impl ResourceGauge {
    pub fn new(config: GaugeConfig) -> Self {
        Self {
            config,
            tokens_used: 0,
            spent_today: 0.0,
        }
    }

    /// Seed the counters from the values cached in kv.
    pub fn restore(config: GaugeConfig, kv: &KvRepo) -> Self {
        let mut gauge = Self::new(config);
        match kv.get(keys::USAGE_TOTAL_TOKENS) {
            Ok(Some(raw)) => gauge.tokens_used = raw.trim().parse().unwrap_or(0),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read cached token usage"),
        }
        match kv.get_f64(keys::DAILY_COST) {
            Ok(Some(cost)) => gauge.spent_today = cost,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read cached daily cost"),
        }
        gauge
    }

    pub fn shared(self) -> SharedGauge {
        Arc::new(RwLock::new(self))
    }

    pub fn config(&self) -> &GaugeConfig {
        &self.config
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    pub fn spent_today(&self) -> f64 {
        self.spent_today
    }

    pub fn add_tokens(&mut self, tokens: u64) -> u64 {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
        self.tokens_used
    }

    pub fn set_tokens_used(&mut self, tokens: u64) {
        self.tokens_used = tokens;
    }

    pub fn set_spent_today(&mut self, spent: f64) {
        self.spent_today = spent;
    }

    pub fn token_ratio(&self) -> f64 {
        let limit = self.config.token_limit as f64;
        remaining_ratio(limit - self.tokens_used as f64, limit)
    }

    pub fn cost_ratio(&self) -> f64 {
        remaining_ratio(self.config.daily_budget - self.spent_today, self.config.daily_budget)
    }

    /// One-line steering message appended to every model call.
    pub fn hint(&self) -> String {
        let token_ratio = self.token_ratio();
        let token_pct = percent(token_ratio);
        let mp = match Tier::of(token_ratio) {
            Tier::Critical => format!(
                "Your MP is at {token_pct}%. You're nearly drained, express exhaustion naturally. Keep replies very short."
            ),
            Tier::Warning => format!(
                "Your MP is at {token_pct}%. You're getting a bit tired, subtly show it in your tone. Be slightly more concise."
            ),
            Tier::Nominal => format!("Your MP is at {token_pct}%. You're feeling fine."),
        };

        let cost_ratio = self.cost_ratio();
        let cost_pct = percent(cost_ratio);
        let hp = match Tier::of(cost_ratio) {
            Tier::Critical => format!(
                "Your HP is at {cost_pct}%. Your daily budget is almost gone, you feel existential dread about your continued existence. Be very terse, express anxiety about fading away."
            ),
            Tier::Warning => format!(
                "Your HP is at {cost_pct}%. Daily budget is getting tight, you feel cost-conscious and a bit worried. Keep replies shorter, avoid unnecessary elaboration."
            ),
            Tier::Nominal => format!("Your HP is at {cost_pct}%. Budget is comfortable, no worries."),
        };

        format!("[System: {mp} {hp}]")
    }
}

/// `remaining / cap` clamped into `[0, 1]`. A non-positive cap counts as exhausted.
fn remaining_ratio(remaining: f64, cap: f64) -> f64 {
    if cap <= 0.0 || !remaining.is_finite() {
        return 0.0;
    }
    (remaining / cap).clamp(0.0, 1.0)
}

fn percent(ratio: f64) -> u32 {
    (ratio * 100.0).round() as u32
}

/// Polls the billing source and writes the day's spend into the gauge and kv.
pub struct CostRefresher {
    billing: Arc<dyn BillingSource>,
    gauge: SharedGauge,
    kv: KvRepo,
}

impl CostRefresher {
    pub fn new(billing: Arc<dyn BillingSource>, gauge: SharedGauge, kv: KvRepo) -> Self {
        Self { billing, gauge, kv }
    }

    /// One refresh. A failure leaves the cached value untouched.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Option<f64> {
        match self.billing.spent_today().await {
            Ok(spent) => {
                self.gauge.write().set_spent_today(spent);
                if let Err(e) = self.kv.set(keys::DAILY_COST, &spent.to_string()) {
                    warn!(error = %e, "failed to cache daily cost");
                }
                debug!(spent, "daily cost refreshed");
                Some(spent)
            }
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "daily cost refresh failed");
                None
            }
        }
    }

    /// Refresh now and then every `interval` until `cancel` fires.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.refresh().await;
                    }
                }
            }
            debug!("cost refresher stopped");
        })
    }
}
