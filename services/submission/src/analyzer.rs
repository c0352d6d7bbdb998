//! Condition analysis capabilities.
//!
//! Image classification and vitals assessment are separate seams so either can
//! be backed by a subprocess, a remote service or an in-process model. Neither
//! ever fails its caller: a failed invocation comes back as the `Degraded`
//! branch of the outcome, carrying the reason, and the pipeline substitutes
//! sentinel values for it.

use crate::config::AnalyzerConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Condition label used when image analysis degraded
pub const UNKNOWN_CONDITION: &str = "unknown";

const MAX_STDERR_CHARS: usize = 512;

/// Which analyzer produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerKind {
    Image,
    Vitals,
}

impl AnalyzerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Image => "image",
            AnalyzerKind::Vitals => "vitals",
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an analyzer invocation produced no usable result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerDegraded {
    #[error("Failed to start analyzer: {0}")]
    Spawn(String),

    #[error("Analyzer exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("Malformed analyzer output: {0}")]
    MalformedOutput(String),

    #[error("Analyzer timed out after {0:?}")]
    TimedOut(Duration),
}

/// Image classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub condition: String,
    pub confidence: f64,
}

impl Classification {
    /// Sentinel classification for a degraded run
    pub fn unknown() -> Self {
        Self {
            condition: UNKNOWN_CONDITION.to_string(),
            confidence: 0.0,
        }
    }

    fn validate(self) -> Result<Self, AnalyzerDegraded> {
        if self.condition.trim().is_empty() {
            return Err(AnalyzerDegraded::MalformedOutput(
                "empty condition label".to_string(),
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AnalyzerDegraded::MalformedOutput(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(self)
    }
}

/// Outcome of image analysis
#[derive(Debug, Clone, PartialEq)]
pub enum ImageAnalysis {
    Classified(Classification),
    Degraded(AnalyzerDegraded),
}

impl ImageAnalysis {
    /// The classification to record, sentinel values when degraded
    pub fn classification(&self) -> Classification {
        match self {
            ImageAnalysis::Classified(c) => c.clone(),
            ImageAnalysis::Degraded(_) => Classification::unknown(),
        }
    }

    pub fn degraded_reason(&self) -> Option<&AnalyzerDegraded> {
        match self {
            ImageAnalysis::Classified(_) => None,
            ImageAnalysis::Degraded(reason) => Some(reason),
        }
    }
}

/// Vitals analyzer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsAssessment {
    /// Alert payload; absent or null when nothing was flagged
    pub alerts: Option<serde_json::Value>,
}

/// Outcome of vitals analysis
#[derive(Debug, Clone, PartialEq)]
pub enum VitalsAnalysis {
    Assessed(VitalsAssessment),
    Degraded(AnalyzerDegraded),
}

impl VitalsAnalysis {
    /// The alerts to record, `None` when degraded or nothing was flagged
    pub fn alerts(&self) -> Option<serde_json::Value> {
        match self {
            VitalsAnalysis::Assessed(assessment) => {
                assessment.alerts.clone().filter(|alerts| !alerts.is_null())
            }
            VitalsAnalysis::Degraded(_) => None,
        }
    }

    pub fn degraded_reason(&self) -> Option<&AnalyzerDegraded> {
        match self {
            VitalsAnalysis::Assessed(_) => None,
            VitalsAnalysis::Degraded(reason) => Some(reason),
        }
    }
}

/// Classifies a locally readable image
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze_image(&self, image_path: &Path) -> ImageAnalysis;
}

/// Assesses free-text vitals
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VitalsAnalyzer: Send + Sync {
    async fn analyze_vitals(&self, vitals_text: &str) -> VitalsAnalysis;
}

/// Analyzer backed by an external executable
///
/// Runs `<program> <args...> <input>` and expects a JSON document on stdout with
/// exit status zero. Anything else, including a run longer than `timeout`, is a
/// degradation. The child is killed if the run is abandoned.
#[derive(Debug, Clone)]
pub struct ProcessAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Image classifier configured from `analyzer.image_*`
    pub fn image(config: &AnalyzerConfig) -> Self {
        Self::new(
            config.image_program.clone(),
            config.image_args.clone(),
            config.timeout(),
        )
    }

    /// Vitals assessor configured from `analyzer.vitals_*`
    pub fn vitals(config: &AnalyzerConfig) -> Self {
        Self::new(
            config.vitals_program.clone(),
            config.vitals_args.clone(),
            config.timeout(),
        )
    }

    async fn invoke<T: DeserializeOwned>(&self, input: &OsStr) -> Result<T, AnalyzerDegraded> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| AnalyzerDegraded::Spawn(format!("{}: {}", self.program, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| AnalyzerDegraded::Spawn(e.to_string()))?,
            Err(_) => return Err(AnalyzerDegraded::TimedOut(self.timeout)),
        };

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(MAX_STDERR_CHARS)
                .collect();
            return Err(AnalyzerDegraded::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim())
            .map_err(|e| AnalyzerDegraded::MalformedOutput(e.to_string()))
    }
}

#[async_trait]
impl ImageAnalyzer for ProcessAnalyzer {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn analyze_image(&self, image_path: &Path) -> ImageAnalysis {
        let result = self
            .invoke::<Classification>(image_path.as_os_str())
            .await
            .and_then(Classification::validate);

        match result {
            Ok(classification) => {
                debug!(
                    condition = %classification.condition,
                    confidence = classification.confidence,
                    "Image classified"
                );
                ImageAnalysis::Classified(classification)
            }
            Err(reason) => ImageAnalysis::Degraded(reason),
        }
    }
}

#[async_trait]
impl VitalsAnalyzer for ProcessAnalyzer {
    #[instrument(skip(self, vitals_text), fields(program = %self.program))]
    async fn analyze_vitals(&self, vitals_text: &str) -> VitalsAnalysis {
        match self.invoke::<VitalsAssessment>(OsStr::new(vitals_text)).await {
            Ok(assessment) => {
                debug!(has_alerts = assessment.alerts.is_some(), "Vitals assessed");
                VitalsAnalysis::Assessed(assessment)
            }
            Err(reason) => VitalsAnalysis::Degraded(reason),
        }
    }
}
