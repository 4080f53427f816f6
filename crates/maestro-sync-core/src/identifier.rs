//! Content fingerprints for audio files.
//!
//! The preferred identity is an AcoustID lookup of the chromaprint computed by
//! `fpcalc`; when that is unavailable the first seconds of decoded PCM are
//! hashed instead. Every failure on the way is logged and degrades to the next
//! strategy, and finally to `None`.

use crate::config::IdentifierSettings;
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub trait Identify: Send + Sync {
    fn identify(&self, path: &Path) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub duration: u32,
    pub fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    id: String,
    score: f64,
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
}

pub struct AudioFileIdentifier {
    settings: IdentifierSettings,
    client: Option<reqwest::blocking::Client>,
}

impl AudioFileIdentifier {
    pub fn new(settings: IdentifierSettings) -> Self {
        let client = match settings.acoustid_key {
            Some(_) => match reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(settings.lookup_timeout_secs))
                .build()
            {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("Could not create HTTP client, AcoustID lookups disabled: {}", e);
                    None
                }
            },
            None => None,
        };
        Self { settings, client }
    }

    fn acoustid(&self, path: &Path) -> Option<String> {
        let (Some(client), Some(key)) = (&self.client, &self.settings.acoustid_key) else {
            return None;
        };
        let output = run_tool(Command::new(&self.settings.fpcalc_command).arg(path))?;
        let fp = parse_fpcalc_output(&String::from_utf8_lossy(&output.stdout))?;

        let duration = fp.duration.to_string();
        let response = client
            .get(&self.settings.lookup_url)
            .query(&[
                ("client", key.as_str()),
                ("duration", duration.as_str()),
                ("fingerprint", fp.fingerprint.as_str()),
                ("meta", "recordingids"),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text());
        let body = match response {
            Ok(body) => body,
            Err(e) => {
                warn!("AcoustID lookup for {} failed: {}", path.display(), e);
                return None;
            }
        };
        let id = best_match(&body);
        if id.is_none() {
            debug!("AcoustID has no match for {}", path.display());
        }
        id
    }

    fn decoded_hash(&self, path: &Path) -> Option<String> {
        let seconds = self.settings.fallback_seconds.to_string();
        let output = run_tool(
            Command::new(&self.settings.decoder_command)
                .args(["-v", "quiet", "-t", seconds.as_str(), "-i"])
                .arg(path)
                .args(["-f", "s16le", "-acodec", "pcm_s16le", "-"]),
        )?;
        Some(blake3::hash(&output.stdout).to_hex().to_string())
    }
}

impl Identify for AudioFileIdentifier {
    fn identify(&self, path: &Path) -> Option<String> {
        if let Some(id) = self.acoustid(path) {
            trace!("{} identified by AcoustID as {}", path.display(), id);
            return Some(id);
        }
        let hash = self.decoded_hash(path);
        if hash.is_none() {
            warn!("Could not compute any fingerprint for {}", path.display());
        }
        hash
    }
}

/// Run an external tool; a missing binary, a non-zero exit or empty stdout
/// all count as "no result".
fn run_tool(command: &mut Command) -> Option<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    match command.output() {
        Ok(output) if !output.status.success() => {
            debug!("{} exited with {}", program, output.status);
            None
        }
        Ok(output) if output.stdout.is_empty() => {
            debug!("{} produced no output", program);
            None
        }
        Ok(output) => Some(output),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} is not installed", program);
            None
        }
        Err(e) => {
            warn!("Could not run {}: {}", program, e);
            None
        }
    }
}

pub fn parse_fpcalc_output(stdout: &str) -> Option<Fingerprint> {
    let mut duration = None;
    let mut fingerprint = None;
    for line in stdout.lines() {
        if let Some(value) = line.strip_prefix("DURATION=") {
            duration = value.trim().parse::<f64>().ok().map(|d| d as u32);
        } else if let Some(value) = line.strip_prefix("FINGERPRINT=") {
            let value = value.trim();
            if !value.is_empty() {
                fingerprint = Some(value.to_string());
            }
        }
    }
    Some(Fingerprint {
        duration: duration?,
        fingerprint: fingerprint?,
    })
}

/// Pick the best scoring result of a lookup response, preferring its
/// MusicBrainz recording id over the AcoustID track id.
fn best_match(body: &str) -> Option<String> {
    let response: LookupResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            warn!("Malformed AcoustID response: {}", e);
            return None;
        }
    };
    if response.status != "ok" {
        warn!("AcoustID returned status {}", response.status);
        return None;
    }
    let best = response
        .results
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))?;
    match best.recordings.into_iter().next() {
        Some(recording) => Some(format!("mbid:{}", recording.id)),
        None => Some(format!("acoustid:{}", best.id)),
    }
}
