//! Daemon configuration.
//!
//! One JSON file describes the managed projects, the command that runs
//! each project's agent, and the recurring windows the scheduler enforces.
//!
//! ```json
//! {
//!   "projects": [
//!     {
//!       "name": "alpha",
//!       "path": "/srv/alpha",
//!       "command": "agent-worker",
//!       "args": ["--queue", "default"],
//!       "schedules": [
//!         {
//!           "startTime": "22:00",
//!           "durationMinutes": 240,
//!           "daysOfWeek": 31,
//!           "maxConcurrency": 2
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Utc};
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use serde::Deserialize;
use uuid::Uuid;

use foreman_store::{DayMask, Project, Schedule};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    pub path: PathBuf,
    /// Program that runs this project's agent.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Window start, "HH:MM" UTC.
    pub start_time: String,
    pub duration_minutes: u32,
    /// Bit 0 is Monday through bit 6 Sunday.
    pub days_of_week: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub yolo_mode: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> u32 {
    1
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        for (i, project) in self.projects.iter().enumerate() {
            if project.name.is_empty() {
                return Err(miette!("projects[{i}]: name must not be empty"));
            }
            if self
                .projects
                .iter()
                .skip(i + 1)
                .any(|p| p.name == project.name)
            {
                return Err(miette!("duplicate project name '{}'", project.name));
            }
            for (j, sc) in project.schedules.iter().enumerate() {
                sc.to_schedule(&project.name)
                    .wrap_err_with(|| format!("projects[{i}].schedules[{j}]"))?;
            }
        }
        Ok(())
    }
}

impl ProjectConfig {
    pub fn to_project(&self) -> Project {
        Project {
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

impl ScheduleConfig {
    /// Build a store schedule for this entry, with a fresh id.
    pub fn to_schedule(&self, project: &str) -> Result<Schedule> {
        let start_time = NaiveTime::parse_from_str(&self.start_time, "%H:%M")
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid start time '{}'", self.start_time))?;
        let days_of_week = DayMask::new(self.days_of_week)
            .map_err(|e| miette!("invalid day mask {}: {e}", self.days_of_week))?;
        let schedule = Schedule {
            id: Uuid::new_v4(),
            project_name: project.to_string(),
            start_time,
            duration_minutes: self.duration_minutes,
            days_of_week,
            enabled: self.enabled,
            yolo_mode: self.yolo_mode,
            model: self.model.clone(),
            max_concurrency: self.max_concurrency,
            crash_count: 0,
            created_at: Utc::now(),
        };
        schedule
            .validate()
            .map_err(|e| miette!("invalid schedule: {e}"))?;
        Ok(schedule)
    }
}
