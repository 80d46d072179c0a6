use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::message::{Exchange, Message, Record};
use crate::pipeline::OutputFormat;

/// Newline-delimited JSON, one record per line.
#[derive(Debug, Clone, Copy)]
pub struct JsonFormat;

impl OutputFormat for JsonFormat {
    fn write_records(&mut self, records: &mut mpsc::Receiver<Arc<Record>>, out: &mut dyn Write) -> io::Result<()> {
        while let Some(record) = records.blocking_recv() {
            serde_json::to_writer(&mut *out, record.as_ref())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// One human-readable line per record.
#[derive(Debug, Clone, Copy)]
pub struct TextFormat;

impl TextFormat {
    fn line(record: &Record) -> String {
        match record {
            Record::Line(line) => line.clone(),
            Record::Message(Message::Request(r)) => format!(
                "{} {} request {} {}",
                r.meta.timestamp.to_rfc3339(),
                r.meta.key(),
                r.method,
                r.uri
            ),
            Record::Message(Message::Response(r)) => format!(
                "{} {} response {} {}",
                r.meta.timestamp.to_rfc3339(),
                r.meta.key(),
                r.status,
                r.reason
            ),
            Record::Exchange(exchange) => {
                let request = &exchange.request;
                let outcome = match (&exchange.response, exchange.latency()) {
                    (Some(r), Some(latency)) => format!("{} {}ms", r.status, latency.as_millis()),
                    (Some(r), None) => r.status.to_string(),
                    (None, _) => "timeout".to_string(),
                };
                format!(
                    "{} {} {} {} -> {}",
                    request.meta.timestamp.to_rfc3339(),
                    request.meta.key(),
                    request.method,
                    request.uri,
                    outcome
                )
            }
        }
    }
}

impl OutputFormat for TextFormat {
    fn write_records(&mut self, records: &mut mpsc::Receiver<Arc<Record>>, out: &mut dyn Write) -> io::Result<()> {
        while let Some(record) = records.blocking_recv() {
            writeln!(out, "{}", Self::line(&record))?;
        }
        Ok(())
    }
}

/// Aggregate over every exchange, written once the output closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsFormat {
    pub exchanges: u64,
    pub timed_out: u64,
    /// Responses by status class, index 1 = 1xx .. 5 = 5xx, 0 = anything else.
    pub status_classes: [u64; 6],
    /// Records that are not exchanges.
    pub other_records: u64,
    latency_total: Duration,
    latency_samples: u64,
    pub latency_max: Duration,
}

impl StatsFormat {
    pub fn record(&mut self, record: &Record) {
        match record {
            Record::Exchange(exchange) => self.record_exchange(exchange),
            _ => self.other_records += 1,
        }
    }

    fn record_exchange(&mut self, exchange: &Exchange) {
        self.exchanges += 1;
        let Some(response) = &exchange.response else {
            self.timed_out += 1;
            return;
        };

        let class = (response.status / 100) as usize;
        let index = if (1..=5).contains(&class) { class } else { 0 };
        self.status_classes[index] += 1;

        if let Some(latency) = exchange.latency() {
            self.latency_total += latency;
            self.latency_samples += 1;
            self.latency_max = self.latency_max.max(latency);
        }
    }

    pub fn latency_avg(&self) -> Option<Duration> {
        if self.latency_samples == 0 {
            return None;
        }
        let nanos = self.latency_total.as_nanos() / u128::from(self.latency_samples);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

impl fmt::Display for StatsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "exchanges: {}", self.exchanges)?;
        writeln!(f, "timed out: {}", self.timed_out)?;
        for class in 1..=5 {
            writeln!(f, "{class}xx: {}", self.status_classes[class])?;
        }
        if self.status_classes[0] > 0 {
            writeln!(f, "other status: {}", self.status_classes[0])?;
        }
        if let Some(avg) = self.latency_avg() {
            writeln!(f, "latency avg: {:.3}ms", avg.as_secs_f64() * 1000.0)?;
            writeln!(f, "latency max: {:.3}ms", self.latency_max.as_secs_f64() * 1000.0)?;
        }
        if self.other_records > 0 {
            writeln!(f, "other records: {}", self.other_records)?;
        }
        Ok(())
    }
}

impl OutputFormat for StatsFormat {
    fn write_records(&mut self, records: &mut mpsc::Receiver<Arc<Record>>, out: &mut dyn Write) -> io::Result<()> {
        while let Some(record) = records.blocking_recv() {
            self.record(&record);
        }
        write!(out, "{self}")
    }
}
