//! Overlay of host-captured DUT events onto the digital channels of a recording.
//!
//! Firmware often reports what it is doing over a debug UART rather than on
//! GPIOs wired to the profiler. [`EventMapper`] records those transitions by
//! name and writes them into `Sample::logic` after the fact.
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{PpkError, Result};
use crate::model::{DIGITAL_CHANNELS, SampleBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeState {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub channel: u8,
    pub high: bool,
    pub timestamp_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEvent {
    pub name: String,
    /// `"D0"`..`"D7"`.
    pub channel: String,
    pub state: EdgeState,
    pub timestamp_s: f64,
}

/// Sidecar describing what each digital channel means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub channels: BTreeMap<String, String>,
    pub events: Vec<LegendEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct EventMapper {
    channels: BTreeMap<String, u8>,
    events: Vec<Event>,
}

impl EventMapper {
    /// `channel_map` pairs event names with channels 0..=7.
    pub fn new<I, S>(channel_map: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        let mut channels = BTreeMap::new();
        for (name, ch) in channel_map {
            let name = name.into();
            if ch >= DIGITAL_CHANNELS {
                return Err(PpkError::InvalidParameter(format!(
                    "channel must be 0-{}, got {ch} for '{name}'",
                    DIGITAL_CHANNELS - 1
                )));
            }
            channels.insert(name, ch);
        }
        Ok(Self {
            channels,
            events: Vec::new(),
        })
    }

    pub fn channels(&self) -> &BTreeMap<String, u8> {
        &self.channels
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&mut self, name: &str, high: bool, timestamp_s: f64) -> Result<()> {
        let Some(&channel) = self.channels.get(name) else {
            let known: Vec<&str> = self.channels.keys().map(String::as_str).collect();
            return Err(PpkError::InvalidParameter(format!(
                "unknown event '{name}', known: {known:?}"
            )));
        };
        if !timestamp_s.is_finite() {
            return Err(PpkError::InvalidParameter(format!(
                "timestamp for '{name}' must be finite"
            )));
        }
        self.events.push(Event {
            name: name.to_string(),
            channel,
            high,
            timestamp_s,
        });
        Ok(())
    }

    pub fn start(&mut self, name: &str, timestamp_s: f64) -> Result<()> {
        self.event(name, true, timestamp_s)
    }

    pub fn stop(&mut self, name: &str, timestamp_s: f64) -> Result<()> {
        self.event(name, false, timestamp_s)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn sorted(&self) -> Vec<&Event> {
        let mut v: Vec<&Event> = self.events.iter().collect();
        v.sort_by(|a, b| a.timestamp_s.total_cmp(&b.timestamp_s));
        v
    }

    /// Write recorded transitions into the buffer's logic masks.
    ///
    /// Only the mapped channel bits are touched; the rest of each mask is kept.
    /// A transition takes effect at the sample index its timestamp falls on,
    /// clamped into the recording.
    pub fn apply(&self, buffer: &mut SampleBuffer) {
        let n = buffer.sample_count();
        if n == 0 || self.events.is_empty() {
            return;
        }
        let rate = f64::from(buffer.sample_rate_hz());
        let managed: u16 = self.channels.values().fold(0, |m, ch| m | (1 << ch));
        let transitions: Vec<(usize, u16, bool)> = self
            .sorted()
            .into_iter()
            .map(|e| {
                let idx = (e.timestamp_s * rate).floor().max(0.0) as usize;
                (idx.min(n - 1), 1u16 << e.channel, e.high)
            })
            .collect();

        let mut state: u16 = 0;
        let mut next = transitions.iter().peekable();
        for (i, logic) in buffer.logic_mut().enumerate() {
            while let Some(&&(idx, bit, high)) = next.peek() {
                if idx > i {
                    break;
                }
                if high {
                    state |= bit;
                } else {
                    state &= !bit;
                }
                next.next();
            }
            *logic = (*logic & !managed) | state;
        }
        tracing::debug!(events = self.events.len(), samples = n, "events applied");
    }

    pub fn legend(&self) -> Legend {
        let channels = self
            .channels
            .iter()
            .map(|(name, ch)| (format!("D{ch}"), name.clone()))
            .collect();
        let events = self
            .sorted()
            .into_iter()
            .map(|e| LegendEvent {
                name: e.name.clone(),
                channel: format!("D{}", e.channel),
                state: if e.high {
                    EdgeState::High
                } else {
                    EdgeState::Low
                },
                timestamp_s: e.timestamp_s,
            })
            .collect();
        Legend { channels, events }
    }

    pub fn save_legend(&self, path: &Path) -> Result<()> {
        let shown = path.display().to_string();
        let json = serde_json::to_vec_pretty(&self.legend())
            .map_err(|e| PpkError::InvalidParameter(format!("legend not serializable: {e}")))?;
        write_atomic(path, &json).map_err(|e| PpkError::io(shown, &e))
    }
}

pub fn load_legend(path: &Path) -> Result<Legend> {
    let shown = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| PpkError::io(&shown, &e))?;
    serde_json::from_slice(&bytes).map_err(|e| PpkError::corrupt(shown, e.to_string()))
}

/// Markers used by [`parse_serial_events`].
#[derive(Debug, Clone)]
pub struct SerialMarkers<'a> {
    pub start: &'a str,
    pub stop: &'a str,
    pub timestamp_prefix: &'a str,
}

impl Default for SerialMarkers<'_> {
    fn default() -> Self {
        Self {
            start: "_STARTED",
            stop: "_STOPPED",
            timestamp_prefix: "T=",
        }
    }
}

/// Build a mapper from DUT log lines such as `T=0.500 GPS_STARTED`.
///
/// The last word of each line is the event token; lines whose token names an
/// unmapped event are skipped. A line without a timestamp counts as t = 0.
pub fn parse_serial_events(
    text: &str,
    channel_map: &BTreeMap<String, u8>,
    markers: &SerialMarkers<'_>,
) -> Result<EventMapper> {
    let mut mapper = EventMapper::new(channel_map.iter().map(|(k, v)| (k.clone(), *v)))?;
    for line in text.lines() {
        let mut timestamp_s = 0.0;
        let mut words = Vec::new();
        for word in line.split_whitespace() {
            match word
                .strip_prefix(markers.timestamp_prefix)
                .and_then(|t| t.parse::<f64>().ok())
            {
                Some(t) => timestamp_s = t,
                None => words.push(word),
            }
        }
        let Some(token) = words.last() else {
            continue;
        };
        let (name, high) = if let Some(n) = token.strip_suffix(markers.start) {
            (n, true)
        } else if let Some(n) = token.strip_suffix(markers.stop) {
            (n, false)
        } else {
            continue;
        };
        if mapper.channels.contains_key(name) {
            mapper.event(name, high, timestamp_s)?;
        }
    }
    Ok(mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, Sample};

    fn buffer(n: usize, logic: u16) -> SampleBuffer {
        SampleBuffer::from_parts(
            Metadata::new(10).unwrap(),
            vec![
                Sample {
                    current_ua: 1.0,
                    logic
                };
                n
            ],
        )
        .unwrap()
    }

    #[test]
    fn channel_out_of_range() {
        assert!(EventMapper::new([("GPS", 8)]).is_err());
    }

    #[test]
    fn unknown_event_rejected() {
        let mut m = EventMapper::new([("GPS", 0)]).unwrap();
        assert!(matches!(
            m.start("LTE", 0.0),
            Err(PpkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn apply_sets_only_mapped_bits() {
        let mut m = EventMapper::new([("GPS", 0), ("LTE", 1)]).unwrap();
        m.start("GPS", 0.2).unwrap();
        m.stop("GPS", 0.5).unwrap();
        m.start("LTE", 0.4).unwrap();
        // D7 set externally must survive.
        let mut b = buffer(8, 0x80);
        m.apply(&mut b);
        let logic: Vec<u16> = b.samples().iter().map(|s| s.logic).collect();
        assert_eq!(
            logic,
            vec![0x80, 0x80, 0x81, 0x81, 0x83, 0x82, 0x82, 0x82]
        );
    }

    #[test]
    fn late_events_clamp_to_last_sample() {
        let mut m = EventMapper::new([("GPS", 2)]).unwrap();
        m.start("GPS", 99.0).unwrap();
        let mut b = buffer(3, 0);
        m.apply(&mut b);
        assert_eq!(b.samples()[2].logic, 4);
        assert_eq!(b.samples()[1].logic, 0);
    }

    #[test]
    fn parses_serial_log() {
        let map: BTreeMap<String, u8> = [("GPS".to_string(), 0), ("LTE_TX".to_string(), 1)].into();
        let text = "boot\nT=0.500 GPS_STARTED\n[app] T=1.8 LTE_TX_STARTED\nT=2.0 GPS_STOPPED\nT=2.1 BLE_STARTED\n";
        let m = parse_serial_events(text, &map, &SerialMarkers::default()).unwrap();
        let got: Vec<(&str, bool, f64)> = m
            .events()
            .iter()
            .map(|e| (e.name.as_str(), e.high, e.timestamp_s))
            .collect();
        assert_eq!(
            got,
            vec![("GPS", true, 0.5), ("LTE_TX", true, 1.8), ("GPS", false, 2.0)]
        );
    }
}
