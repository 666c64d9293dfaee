// ── Rx-byte smoothing strategies ──

/// Weight kept from the previous smoothed reading under [`Smoothing::Ewma`].
pub const EWMA_HISTORY_WEIGHT: f64 = 0.2;

/// How the link tap turns consecutive cumulative `rx_bytes` readings into
/// a per-cycle increment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Smoothing {
    /// Plain difference of raw counters.
    #[default]
    Raw,
    /// Exponentially weighted: the counter itself is smoothed before
    /// differencing, `s = 0.2 * s_prev + 0.8 * raw`, increment `s - s_prev`.
    Ewma,
}

/// Outcome of feeding one counter reading to a strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Step {
    /// Value to keep as the next baseline.
    pub baseline: f64,
    pub increment: f64,
    /// The raw counter went backwards (switch restart or counter wrap).
    pub regressed: bool,
}

impl Smoothing {
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub(crate) fn step(self, previous: f64, raw: u64) -> Step {
        let raw = raw as f64;
        if raw < previous {
            return Step {
                baseline: raw,
                increment: 0.0,
                regressed: true,
            };
        }
        let baseline = match self {
            Self::Raw => raw,
            Self::Ewma => EWMA_HISTORY_WEIGHT * previous + (1.0 - EWMA_HISTORY_WEIGHT) * raw,
        };
        Step {
            baseline,
            increment: baseline - previous,
            regressed: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn raw_increment_is_plain_delta() {
        let step = Smoothing::Raw.step(1_000.0, 1_500);
        assert!((step.increment - 500.0).abs() < f64::EPSILON);
        assert!((step.baseline - 1_500.0).abs() < f64::EPSILON);
        assert!(!step.regressed);
    }

    #[test]
    fn ewma_smooths_the_counter_before_differencing() {
        // s = 0.2 * 1000 + 0.8 * 2000 = 1800; increment = 800
        let step = Smoothing::Ewma.step(1_000.0, 2_000);
        assert!((step.baseline - 1_800.0).abs() < 1e-9);
        assert!((step.increment - 800.0).abs() < 1e-9);
    }

    #[test]
    fn regression_resets_baseline_and_reports_zero() {
        for mode in [Smoothing::Raw, Smoothing::Ewma] {
            let step = mode.step(10_000.0, 200);
            assert!(step.regressed);
            assert!((step.baseline - 200.0).abs() < f64::EPSILON);
            assert!(step.increment.abs() < f64::EPSILON);
        }
    }

    #[test]
    fn parses_from_config_strings() {
        assert_eq!("raw".parse::<Smoothing>().unwrap(), Smoothing::Raw);
        assert_eq!("ewma".parse::<Smoothing>().unwrap(), Smoothing::Ewma);
        assert!("median".parse::<Smoothing>().is_err());
        assert_eq!(Smoothing::Ewma.to_string(), "ewma");
    }
}
