// Time-series trend analysis: growth, direction, posting-time patterns,
// anomalies, smoothing and a naive forecast.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;

use super::engagement::{round2, Direction};

pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;
pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 7;

/// Relative band around the first-half mean treated as "stable".
const TREND_BAND: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Growth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GrowthRate {
    pub absolute_change: f64,
    pub percent_change: f64,
    pub daily_rate: f64,
    pub direction: Direction,
}

/// Change between two measurements `period_days` apart.
pub fn growth_rate(current: f64, previous: f64, period_days: u32) -> GrowthRate {
    let days = f64::from(period_days.max(1));
    if previous == 0.0 {
        if current > 0.0 {
            return GrowthRate {
                absolute_change: current,
                percent_change: 100.0,
                daily_rate: current / days,
                direction: Direction::Up,
            };
        }
        return GrowthRate {
            absolute_change: 0.0,
            percent_change: 0.0,
            daily_rate: 0.0,
            direction: Direction::Stable,
        };
    }

    let change = current - previous;
    let direction = if change > 0.0 {
        Direction::Up
    } else if change < 0.0 {
        Direction::Down
    } else {
        Direction::Stable
    };
    GrowthRate {
        absolute_change: change,
        percent_change: round2(change / previous * 100.0),
        daily_rate: round2(change / days),
        direction,
    }
}

// ---------------------------------------------------------------------------
// Series statistics
// ---------------------------------------------------------------------------

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1). Zero for fewer than two values.
fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Upward,
    Downward,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesTrend {
    pub direction: TrendDirection,
    pub average: f64,
    pub peak: f64,
    pub low: f64,
    pub volatility: f64,
    pub data_points: usize,
    pub first_half_avg: Option<f64>,
    pub second_half_avg: Option<f64>,
}

/// Compare the means of the first and second halves of `series`; the
/// second half must move more than 5% to count as a trend.
pub fn series_trend(series: &[TimePoint]) -> SeriesTrend {
    if series.len() < 2 {
        return SeriesTrend {
            direction: TrendDirection::InsufficientData,
            average: 0.0,
            peak: 0.0,
            low: 0.0,
            volatility: 0.0,
            data_points: series.len(),
            first_half_avg: None,
            second_half_avg: None,
        };
    }

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let mid = values.len() / 2;
    let first = mean(&values[..mid]);
    let second = mean(&values[mid..]);

    let direction = if second > first * (1.0 + TREND_BAND) {
        TrendDirection::Upward
    } else if second < first * (1.0 - TREND_BAND) {
        TrendDirection::Downward
    } else {
        TrendDirection::Stable
    };

    SeriesTrend {
        direction,
        average: round2(mean(&values)),
        peak: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        low: values.iter().copied().fold(f64::INFINITY, f64::min),
        volatility: round2(stdev(&values)),
        data_points: values.len(),
        first_half_avg: Some(round2(first)),
        second_half_avg: Some(round2(second)),
    }
}

// ---------------------------------------------------------------------------
// Posting times
// ---------------------------------------------------------------------------

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapCell {
    pub day: &'static str,
    pub hour: u32,
    pub engagement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingTimes {
    /// UTC hour with the highest mean engagement; ties go to the earlier hour.
    pub best_hour: Option<u32>,
    /// Weekday with the highest mean engagement; ties go to the earlier day.
    pub best_day: Option<&'static str>,
    pub hourly_avg: BTreeMap<u32, f64>,
    pub daily_avg: BTreeMap<&'static str, f64>,
    /// Monday-first, then by hour; only cells with data.
    pub heatmap: Vec<HeatmapCell>,
}

/// Mean engagement by UTC hour and weekday for `(published_at, engagement)`.
pub fn best_posting_times(posts: &[(DateTime<Utc>, f64)]) -> PostingTimes {
    let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut by_day: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    let mut cells: BTreeMap<(usize, u32), Vec<f64>> = BTreeMap::new();

    for (ts, engagement) in posts {
        let hour = ts.hour();
        let day = ts.weekday().num_days_from_monday() as usize;
        by_hour.entry(hour).or_default().push(*engagement);
        by_day.entry(day).or_default().push(*engagement);
        cells.entry((day, hour)).or_default().push(*engagement);
    }

    let hourly_avg: BTreeMap<u32, f64> = by_hour
        .iter()
        .map(|(h, v)| (*h, round2(mean(v))))
        .collect();
    let day_avgs: Vec<(usize, f64)> = by_day.iter().map(|(d, v)| (*d, round2(mean(v)))).collect();

    let best_hour = argmax(hourly_avg.iter().map(|(h, v)| (*h, *v)));
    let best_day = argmax(day_avgs.iter().copied()).map(|d| weekday_name(WEEK[d]));

    PostingTimes {
        best_hour,
        best_day,
        hourly_avg,
        daily_avg: day_avgs
            .iter()
            .map(|(d, v)| (weekday_name(WEEK[*d]), *v))
            .collect(),
        heatmap: cells
            .iter()
            .map(|((d, h), v)| HeatmapCell {
                day: weekday_name(WEEK[*d]),
                hour: *h,
                engagement: round2(mean(v)),
            })
            .collect(),
    }
}

/// Key of the largest value; the first key wins ties.
fn argmax<K: Copy>(items: impl Iterator<Item = (K, f64)>) -> Option<K> {
    let mut best: Option<(K, f64)> = None;
    for (k, v) in items {
        match best {
            Some((_, bv)) if v <= bv => {}
            _ => best = Some((k, v)),
        }
    }
    best.map(|(k, _)| k)
}

// ---------------------------------------------------------------------------
// Anomalies and smoothing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: f64,
    pub deviation: f64,
}

/// Points whose |z-score| exceeds `threshold`. Needs at least three points
/// and non-zero spread.
pub fn detect_anomalies(series: &[TimePoint], threshold: f64) -> Vec<Anomaly> {
    if series.len() < 3 {
        return Vec::new();
    }
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let m = mean(&values);
    let sd = stdev(&values);
    if sd == 0.0 {
        return Vec::new();
    }

    series
        .iter()
        .filter_map(|p| {
            let z = ((p.value - m) / sd).abs();
            (z > threshold).then(|| Anomaly {
                timestamp: p.timestamp,
                value: p.value,
                z_score: round2(z),
                deviation: round2(p.value - m),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothedPoint {
    pub timestamp: DateTime<Utc>,
    pub moving_average: f64,
    pub original_value: f64,
}

/// Trailing mean over `window` points, stamped at each window's last point.
/// Empty when the series is shorter than the window.
pub fn moving_average(series: &[TimePoint], window: usize) -> Vec<SmoothedPoint> {
    if window == 0 || series.len() < window {
        return Vec::new();
    }
    series
        .windows(window)
        .map(|w| {
            let values: Vec<f64> = w.iter().map(|p| p.value).collect();
            let last = w[w.len() - 1];
            SmoothedPoint {
                timestamp: last.timestamp,
                moving_average: round2(mean(&values)),
                original_value: last.value,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    LinearTrend,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub forecast: f64,
    pub confidence: Confidence,
    pub method: ForecastMethod,
    pub trend_per_period: Option<f64>,
}

/// Extend the straight line from the first to the last value
/// `periods_ahead` steps. Confidence falls as the coefficient of variation
/// rises (under 0.2 high, under 0.5 medium).
pub fn forecast(series: &[TimePoint], periods_ahead: u32) -> Forecast {
    if series.len() < 2 {
        return Forecast {
            forecast: 0.0,
            confidence: Confidence::Low,
            method: ForecastMethod::InsufficientData,
            trend_per_period: None,
        };
    }

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let first = values[0];
    let last = values[values.len() - 1];
    let per_period = (last - first) / (values.len() - 1) as f64;
    let projected = last + per_period * f64::from(periods_ahead);

    let m = mean(&values);
    let cv = if m != 0.0 { stdev(&values) / m } else { 1.0 };
    let confidence = if cv < 0.2 {
        Confidence::High
    } else if cv < 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Forecast {
        forecast: round2(projected),
        confidence,
        method: ForecastMethod::LinearTrend,
        trend_per_period: Some(round2(per_period)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series(values: &[f64]) -> Vec<TimePoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimePoint {
                timestamp: start + chrono::Duration::days(i as i64),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn growth_from_zero() {
        let g = growth_rate(10.0, 0.0, 5);
        assert_eq!(g.direction, Direction::Up);
        assert_eq!(g.percent_change, 100.0);
        assert_eq!(g.daily_rate, 2.0);
        assert_eq!(growth_rate(0.0, 0.0, 1).direction, Direction::Stable);
    }

    #[test]
    fn growth_rounds_percent_and_daily() {
        let g = growth_rate(110.0, 30.0, 3);
        assert_eq!(g.absolute_change, 80.0);
        assert_eq!(g.percent_change, 266.67);
        assert_eq!(g.daily_rate, 26.67);
        assert_eq!(g.direction, Direction::Up);

        assert_eq!(growth_rate(5.0, 10.0, 1).direction, Direction::Down);
    }

    #[test]
    fn short_series_is_insufficient() {
        let t = series_trend(&series(&[4.0]));
        assert_eq!(t.direction, TrendDirection::InsufficientData);
        assert_eq!(t.data_points, 1);
        assert!(t.first_half_avg.is_none());
    }

    #[test]
    fn series_direction_uses_five_percent_band() {
        assert_eq!(
            series_trend(&series(&[10.0, 10.0, 12.0, 12.0])).direction,
            TrendDirection::Upward
        );
        assert_eq!(
            series_trend(&series(&[10.0, 10.0, 8.0, 8.0])).direction,
            TrendDirection::Downward
        );
        // +4% stays inside the band.
        assert_eq!(
            series_trend(&series(&[100.0, 100.0, 104.0, 104.0])).direction,
            TrendDirection::Stable
        );
    }

    #[test]
    fn series_stats() {
        let t = series_trend(&series(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]));
        assert_eq!(t.average, 5.0);
        assert_eq!(t.peak, 9.0);
        assert_eq!(t.low, 2.0);
        // sample stdev of this classic set is sqrt(32/7)
        assert_eq!(t.volatility, 2.14);
        assert_eq!(t.first_half_avg, Some(3.5));
        assert_eq!(t.second_half_avg, Some(6.5));
    }

    #[test]
    fn posting_times_pick_best_hour_and_day() {
        // 2024-01-01 is a Monday.
        let mon9 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let mon18 = Utc.with_ymd_and_hms(2024, 1, 1, 18, 30, 0).unwrap();
        let wed9 = Utc.with_ymd_and_hms(2024, 1, 3, 9, 15, 0).unwrap();

        let pt = best_posting_times(&[(mon9, 2.0), (mon18, 10.0), (wed9, 4.0)]);
        assert_eq!(pt.best_hour, Some(18));
        assert_eq!(pt.best_day, Some("Monday"));
        assert_eq!(pt.hourly_avg.get(&9), Some(&3.0));
        assert_eq!(pt.daily_avg.get("Monday"), Some(&6.0));
        assert_eq!(pt.daily_avg.get("Wednesday"), Some(&4.0));

        let order: Vec<(&str, u32)> = pt.heatmap.iter().map(|c| (c.day, c.hour)).collect();
        assert_eq!(order, vec![("Monday", 9), ("Monday", 18), ("Wednesday", 9)]);
    }

    #[test]
    fn posting_times_empty() {
        let pt = best_posting_times(&[]);
        assert!(pt.best_hour.is_none());
        assert!(pt.best_day.is_none());
        assert!(pt.heatmap.is_empty());
    }

    #[test]
    fn anomalies_need_three_points_and_spread() {
        assert!(detect_anomalies(&series(&[1.0, 100.0]), 2.0).is_empty());
        assert!(detect_anomalies(&series(&[5.0, 5.0, 5.0, 5.0]), 2.0).is_empty());
    }

    #[test]
    fn anomaly_detected_above_threshold() {
        let mut values = vec![10.0; 9];
        values.push(100.0);
        let found = detect_anomalies(&series(&values), 2.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 100.0);
        assert_eq!(found[0].deviation, 81.0);
        assert!(found[0].z_score > 2.0);
    }

    #[test]
    fn moving_average_windows() {
        let s = series(&[1.0, 2.0, 3.0, 4.0]);
        let ma = moving_average(&s, 2);
        assert_eq!(ma.len(), 3);
        assert_eq!(ma[0].moving_average, 1.5);
        assert_eq!(ma[0].original_value, 2.0);
        assert_eq!(ma[0].timestamp, s[1].timestamp);
        assert_eq!(ma[2].moving_average, 3.5);

        assert!(moving_average(&s, 7).is_empty());
    }

    #[test]
    fn forecast_linear_with_confidence() {
        let f = forecast(&series(&[100.0, 110.0, 120.0]), 1);
        assert_eq!(f.method, ForecastMethod::LinearTrend);
        assert_eq!(f.forecast, 130.0);
        assert_eq!(f.trend_per_period, Some(10.0));
        assert_eq!(f.confidence, Confidence::High);

        let noisy = forecast(&series(&[1.0, 10.0, 1.0, 10.0]), 2);
        assert_eq!(noisy.confidence, Confidence::Medium);

        let wild = forecast(&series(&[0.0, 100.0, 0.0]), 1);
        assert_eq!(wild.confidence, Confidence::Low);
    }

    #[test]
    fn forecast_zero_mean_is_low_confidence() {
        let f = forecast(&series(&[-1.0, 1.0]), 1);
        assert_eq!(f.confidence, Confidence::Low);
        assert_eq!(f.forecast, 3.0);
    }

    #[test]
    fn forecast_insufficient() {
        let f = forecast(&series(&[5.0]), 1);
        assert_eq!(f.method, ForecastMethod::InsufficientData);
        assert_eq!(f.forecast, 0.0);
    }
}
