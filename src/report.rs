//! Reporters turn a sequence of samples into output bytes, and the
//! report-stage filters select the subset to render.
//!
//! Every reporter is a pure function of its input. Callers sort samples by
//! timestamp first (the CLI does); the plot and the `Time=` filter anchor
//! on the first sample.

use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::metrics::{metrics, Metrics};
use crate::sample::Sample;
use crate::target::Method;

#[derive(Debug, Clone)]
pub enum Reporter {
    Text,
    Json,
    Plot,
    Dump,
    Histogram(Histogram),
}

impl FromStr for Reporter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Reporter::Text),
            "json" => Ok(Reporter::Json),
            "plot" => Ok(Reporter::Plot),
            "dump" => Ok(Reporter::Dump),
            _ => match s.strip_prefix("hist[").and_then(|rest| rest.strip_suffix(']')) {
                Some(buckets) => buckets.parse().map(Reporter::Histogram),
                None => Err(Error::setup(format!("unknown reporter {s:?}"))),
            },
        }
    }
}

impl Reporter {
    pub fn report(&self, samples: &[Sample]) -> Result<Vec<u8>, Error> {
        match self {
            Reporter::Text => Ok(text(samples)),
            Reporter::Json => json(samples),
            Reporter::Plot => Ok(plot(samples)),
            Reporter::Dump => Ok(dump(samples)),
            Reporter::Histogram(hist) => Ok(hist.report(samples)),
        }
    }
}

/// Aligned, labeled blocks for the global scope and each method scope.
pub fn text(samples: &[Sample]) -> Vec<u8> {
    let all = metrics(samples);
    let mut out = String::new();
    scope_to_text(&mut out, &all, "ALL");
    for (method, scoped) in &all.by_method {
        scope_to_text(&mut out, scoped, method.as_str());
    }
    out.into_bytes()
}

fn scope_to_text(out: &mut String, m: &Metrics, label: &str) {
    let col = |name: &str| format!("{name} ({label})");
    let row = |out: &mut String, name: String, tags: &str, value: String| {
        let _ = writeln!(out, "{name:<22}{tags:<28}{value}");
    };

    row(out, col("Requests"), "[total]", m.requests.to_string());
    row(
        out,
        col("Duration"),
        "[total, attack, wait]",
        format!(
            "{}, {}, {}",
            fmt_duration(m.duration + m.wait),
            fmt_duration(m.duration),
            fmt_duration(m.wait)
        ),
    );
    row(
        out,
        col("Latencies"),
        "[mean, 50, 95, 99, max]",
        format!(
            "{}, {}, {}, {}, {}",
            fmt_duration(m.latencies.mean),
            fmt_duration(m.latencies.p50),
            fmt_duration(m.latencies.p95),
            fmt_duration(m.latencies.p99),
            fmt_duration(m.latencies.max)
        ),
    );
    row(
        out,
        col("Bytes In"),
        "[total, mean]",
        format!("{}, {:.2}", m.bytes_in.total, m.bytes_in.mean),
    );
    row(
        out,
        col("Bytes Out"),
        "[total, mean]",
        format!("{}, {:.2}", m.bytes_out.total, m.bytes_out.mean),
    );
    row(
        out,
        col("Success"),
        "[ratio]",
        format!("{:.2}%", m.success * 100.0),
    );
    let codes = m
        .status_codes
        .iter()
        .map(|(code, count)| format!("{code}:{count}"))
        .collect::<Vec<_>>()
        .join("  ");
    row(out, col("Status Codes"), "[code:count]", codes);
    let _ = writeln!(out, "Error Set ({label}):");
    for error in &m.errors {
        let _ = writeln!(out, "{error}");
    }
}

fn fmt_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    // trim sub-microsecond noise so means read cleanly
    humantime::format_duration(Duration::from_micros(d.as_micros() as u64)).to_string()
}

/// The aggregated [`Metrics`] as JSON.
pub fn json(samples: &[Sample]) -> Result<Vec<u8>, Error> {
    let mut out = serde_json::to_vec(&metrics(samples))
        .map_err(|err| Error::Encode(std::io::Error::other(err)))?;
    out.push(b'\n');
    Ok(out)
}

/// One line per sample, machine-friendly.
pub fn dump(samples: &[Sample]) -> Vec<u8> {
    let mut out = String::from("code,timestamp,latency_ns,bytes_out,bytes_in,error,method,url\n");
    for s in samples {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{:?},{},{}",
            s.code,
            s.timestamp.to_rfc3339(),
            s.latency.as_nanos(),
            s.bytes_out,
            s.bytes_in,
            s.error,
            s.method,
            s.url
        );
    }
    out.into_bytes()
}

/// A self-contained HTML page plotting per-request latency over time,
/// with mutually exclusive OK and error series.
pub fn plot(samples: &[Sample]) -> Vec<u8> {
    let mut series = String::new();
    if let Some(first) = samples.first().map(|s| s.timestamp) {
        for s in samples {
            let seconds = (s.timestamp - first).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
            let latency_ms = s.latency.as_secs_f64() * 1000.0;
            if s.error.is_empty() {
                let _ = write!(series, "[{seconds},NaN,{latency_ms}],");
            } else {
                let _ = write!(series, "[{seconds},{latency_ms},NaN],");
            }
        }
        series.pop();
    }
    PLOT_TEMPLATE.replace("{series}", &series).into_bytes()
}

const PLOT_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
  <title>stampede plot</title>
  <script src="https://unpkg.com/dygraphs@2.2.1/dist/dygraph.min.js"></script>
</head>
<body>
  <div id="latencies" style="font-family: Courier; width: 100%; height: 600px"></div>
  <script>
  new Dygraph(
    document.getElementById("latencies"),
    [{series}],
    {
      title: 'stampede plot',
      labels: ['Seconds', 'ERR', 'OK'],
      ylabel: 'Latency (ms)',
      xlabel: 'Seconds elapsed',
      showRoller: true,
      colors: ['#FA7878', '#8AE234'],
      legend: 'always',
      logscale: true,
      strokeWidth: 1.3
    }
  );
  </script>
</body>
</html>
"#;

/// Latency counts over user-supplied bucket edges.
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<Duration>,
}

impl FromStr for Histogram {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buckets = Vec::new();
        for token in s.split(',') {
            let token = token.trim();
            let edge = if token == "0" {
                Duration::ZERO
            } else {
                humantime::parse_duration(token)
                    .map_err(|err| Error::setup(format!("bad bucket {token:?}: {err}")))?
            };
            buckets.push(edge);
        }
        if buckets.is_empty() || !buckets.is_sorted() {
            return Err(Error::setup(format!("buckets must be ascending: {s:?}")));
        }
        Ok(Self { buckets })
    }
}

impl Histogram {
    pub fn report(&self, samples: &[Sample]) -> Vec<u8> {
        let mut counts = vec![0u64; self.buckets.len()];
        for s in samples {
            if let Some(slot) = self.buckets.iter().rposition(|edge| s.latency >= *edge) {
                counts[slot] += 1;
            }
        }

        let total = samples.len().max(1) as f64;
        let mut out = String::new();
        let _ = writeln!(out, "{:<24}{:<8}{:<10}Histogram", "Bucket", "#", "%");
        for (i, count) in counts.iter().enumerate() {
            let lo = fmt_duration(self.buckets[i]);
            let hi = match self.buckets.get(i + 1) {
                Some(edge) => fmt_duration(*edge),
                None => "+Inf".to_string(),
            };
            let ratio = *count as f64 / total;
            let bar = "#".repeat((ratio * 40.0).round() as usize);
            let _ = writeln!(
                out,
                "{:<24}{:<8}{:<10}{}",
                format!("[{lo}, {hi}]"),
                count,
                format!("{:.2}%", ratio * 100.0),
                bar
            );
        }
        out.into_bytes()
    }
}

/// A report-stage predicate; all configured filters must match.
#[derive(Debug, Clone)]
pub enum Filter {
    Method(Method),
    Url(String),
    Time { lookback: bool, offset: Duration },
}

/// Parse space-separated `k=v` filter terms, e.g.
/// `"Method=GET Time=-500ms"`.
pub fn parse_filters(spec: &str) -> Result<Vec<Filter>, Error> {
    let mut filters = Vec::new();
    for term in spec.split_whitespace() {
        let (key, value) = term
            .split_once('=')
            .ok_or_else(|| Error::setup(format!("bad filter {term:?}, expected k=v")))?;
        let filter = match key {
            "Method" => Filter::Method(
                value
                    .parse()
                    .map_err(|_| Error::setup(format!("bad filter method {value:?}")))?,
            ),
            "URL" => Filter::Url(value.to_string()),
            "Time" => {
                let (lookback, text) = match value.split_at_checked(1) {
                    Some(("+", rest)) => (false, rest),
                    Some(("-", rest)) => (true, rest),
                    _ => (true, value),
                };
                let offset = humantime::parse_duration(text)
                    .map_err(|err| Error::setup(format!("bad filter duration {value:?}: {err}")))?;
                Filter::Time { lookback, offset }
            }
            _ => return Err(Error::setup(format!("unknown filter key {key:?}"))),
        };
        filters.push(filter);
    }
    Ok(filters)
}

/// Keep the samples matching every filter. `Time=` is anchored at the
/// first sample, so the input must already be sorted by timestamp.
pub fn apply_filters(filters: &[Filter], samples: Vec<Sample>) -> Vec<Sample> {
    let Some(first) = samples.first().map(|s| s.timestamp) else {
        return samples;
    };
    samples
        .into_iter()
        .filter(|s| {
            filters.iter().all(|f| match f {
                Filter::Method(method) => s.method == method.as_str(),
                Filter::Url(substring) => s.url.contains(substring),
                Filter::Time { lookback, offset } => {
                    let anchor = first + chrono::Duration::from_std(*offset).unwrap_or_default();
                    if *lookback {
                        s.timestamp < anchor
                    } else {
                        s.timestamp > anchor
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn sample(code: u16, millis: i64, latency_ms: u64, method: &str, url: &str) -> Sample {
        Sample {
            code,
            timestamp: DateTime::from_timestamp_millis(millis).unwrap(),
            latency: Duration::from_millis(latency_ms),
            bytes_out: 10,
            bytes_in: 20,
            error: if code >= 500 {
                "Internal Server Error".into()
            } else {
                String::new()
            },
            method: method.into(),
            url: url.into(),
        }
    }

    fn fixture() -> Vec<Sample> {
        vec![
            sample(500, 0, 100, "GET", "/a"),
            sample(200, 1_000, 20, "GET", "/b"),
            sample(200, 2_000, 30, "POST", "/c"),
        ]
    }

    #[test]
    fn reporter_names_parse() {
        assert!(matches!("text".parse(), Ok(Reporter::Text)));
        assert!(matches!("json".parse(), Ok(Reporter::Json)));
        assert!(matches!("plot".parse(), Ok(Reporter::Plot)));
        assert!(matches!("dump".parse(), Ok(Reporter::Dump)));
        assert!(matches!("hist[0,2ms,4ms]".parse(), Ok(Reporter::Histogram(_))));
        assert!("tabular".parse::<Reporter>().is_err());
        assert!("hist[2ms,1ms]".parse::<Reporter>().is_err());
    }

    #[test]
    fn text_report_lists_every_scope() {
        let rendered = String::from_utf8(text(&fixture())).unwrap();
        assert!(rendered.contains("Requests (ALL)"));
        for method in Method::ALL {
            assert!(rendered.contains(&format!("Requests ({method})")));
        }
        assert!(rendered.contains("200:2  500:1"));
        assert!(rendered.contains("66.67%"));
        assert!(rendered.contains("Internal Server Error"));
    }

    #[test]
    fn json_report_round_trips() {
        let bytes = json(&fixture()).unwrap();
        let parsed: Metrics = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, metrics(&fixture()));
    }

    #[test]
    fn plot_marks_errors_and_successes_mutually_exclusive() {
        let rendered = String::from_utf8(plot(&fixture())).unwrap();
        assert!(rendered.contains("new Dygraph"));
        assert!(rendered.contains("[0,100,NaN]"));
        assert!(rendered.contains("[1,NaN,20]"));
        assert!(rendered.contains("[2,NaN,30]"));
    }

    #[test]
    fn dump_emits_one_line_per_sample() {
        let rendered = String::from_utf8(dump(&fixture())).unwrap();
        assert_eq!(rendered.lines().count(), 4);
        assert!(rendered.lines().nth(1).unwrap().starts_with("500,"));
    }

    #[test]
    fn histogram_buckets_latencies() {
        let hist: Histogram = "0,25ms,150ms".parse().unwrap();
        let rendered = String::from_utf8(hist.report(&fixture())).unwrap();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("[0s, 25ms]") && lines[1].contains('1'));
        assert!(lines[2].starts_with("[25ms, 150ms]") && lines[2].contains('2'));
        assert!(lines[3].starts_with("[150ms, +Inf]"));
    }

    #[test]
    fn method_filter_selects_the_subset() {
        let filters = parse_filters("Method=GET").unwrap();
        let kept = apply_filters(&filters, fixture());
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|s| s.method == "GET"));
    }

    #[test]
    fn url_filter_matches_substrings() {
        let filters = parse_filters("URL=/b").unwrap();
        let kept = apply_filters(&filters, fixture());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "/b");
    }

    #[test]
    fn time_filter_is_anchored_at_the_first_sample() {
        let samples = vec![
            sample(200, 0, 1, "GET", "/a"),
            sample(200, 300, 1, "GET", "/b"),
            sample(200, 900, 1, "GET", "/c"),
        ];
        let lookback = parse_filters("Time=-500ms").unwrap();
        let kept = apply_filters(&lookback, samples.clone());
        assert_eq!(kept.len(), 2);

        let forward = parse_filters("Time=+500ms").unwrap();
        let kept = apply_filters(&forward, samples);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "/c");
    }

    #[test]
    fn filters_compose_conjunctively() {
        let filters = parse_filters("Method=GET URL=/a").unwrap();
        let kept = apply_filters(&filters, fixture());
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn unknown_filter_key_is_a_setup_error() {
        assert!(matches!(parse_filters("Verb=GET"), Err(Error::Setup(_))));
        assert!(matches!(parse_filters("Method"), Err(Error::Setup(_))));
    }
}
