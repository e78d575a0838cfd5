use chrono::NaiveDate;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// SMTP settings for credential mail
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

/// Runtime configuration, read from the environment (a `.env` file is
/// loaded at startup). Variable names follow the original deployment's
/// `.env` layout.
#[derive(Debug, Clone)]
pub struct Config {
    pub canvas_host: String,
    pub canvas_token: String,
    pub root_account: String,

    pub crm_host: String,
    pub crm_api_key: String,
    pub crm_site_key: String,

    pub current_term_name: String,
    pub current_period_name: String,
    /// Explicit graduation year of the current senior class. When unset,
    /// it is derived from today's date with a June 1 rollover.
    pub current_grad_year: Option<i32>,
    /// When true, blank Canvas grades are read from the final_* fields
    /// (blanks count as zero) instead of current_*.
    pub zero_blanks: bool,

    /// Domain appended to generated student addresses, with leading '@'.
    pub student_email_domain: String,

    pub database_path: String,
    pub output_dir: PathBuf,

    pub school_year_start: Option<NaiveDate>,
    pub school_year_end: Option<NaiveDate>,
    /// Holiday ranges as inclusive date pairs.
    pub school_holidays: Vec<(NaiveDate, NaiveDate)>,

    pub smtp: Option<SmtpConfig>,
}

fn required(var: &'static str) -> ConfigResult<String> {
    env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn optional(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty())
}

fn parse_date(var: &'static str, value: &str) -> ConfigResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

impl Config {
    /// Read the full configuration from the environment.
    pub fn from_env() -> ConfigResult<Self> {
        let current_grad_year = match optional("current_grad_year") {
            Some(v) => Some(v.parse::<i32>().map_err(|e| ConfigError::Invalid {
                var: "current_grad_year",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let zero_blanks = match optional("zero_blanks") {
            Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y"),
            None => false,
        };

        let mut domain = optional("student_email_domain")
            .unwrap_or_else(|| "@students.example.com".to_string());
        if !domain.starts_with('@') {
            domain.insert(0, '@');
        }

        let school_year_start = match optional("school_year_start") {
            Some(v) => Some(parse_date("school_year_start", &v)?),
            None => None,
        };
        let school_year_end = match optional("school_year_end") {
            Some(v) => Some(parse_date("school_year_end", &v)?),
            None => None,
        };

        // school_holidays=2025-11-24..2025-11-28,2025-12-22..2026-01-05
        let mut school_holidays = Vec::new();
        if let Some(raw) = optional("school_holidays") {
            for range in raw.split(',').filter(|r| !r.trim().is_empty()) {
                let (start, end) = match range.split_once("..") {
                    Some((s, e)) => (s.trim(), e.trim()),
                    None => (range.trim(), range.trim()),
                };
                school_holidays.push((
                    parse_date("school_holidays", start)?,
                    parse_date("school_holidays", end)?,
                ));
            }
        }

        let smtp = match optional("smtp_host") {
            Some(host) => {
                let port = match optional("smtp_port") {
                    Some(p) => p.parse::<u16>().map_err(|e| ConfigError::Invalid {
                        var: "smtp_port",
                        reason: e.to_string(),
                    })?,
                    None => 587,
                };
                Some(SmtpConfig {
                    host,
                    port,
                    username: required("smtp_username")?,
                    password: required("smtp_password")?,
                    from_address: required("smtp_from")?,
                })
            }
            None => None,
        };

        Ok(Self {
            canvas_host: required("canvas_host")?,
            canvas_token: required("canvas_access_token")?,
            root_account: required("root_account")?,
            crm_host: required("crm_host")?,
            crm_api_key: required("crm_api_key")?,
            crm_site_key: required("crm_site_key")?,
            current_term_name: required("current_term_name")?,
            current_period_name: required("current_period_name")?,
            current_grad_year,
            zero_blanks,
            student_email_domain: domain,
            database_path: optional("database_path").unwrap_or_else(|| "records.db".to_string()),
            output_dir: optional("output_dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("generated_docs")),
            school_year_start,
            school_year_end,
            school_holidays,
            smtp,
        })
    }

    /// Graduation year of the current senior class, from config or derived
    /// from today with the June 1 rollover.
    pub fn grad_year(&self) -> i32 {
        self.current_grad_year
            .unwrap_or_else(|| crate::grading::rollover_grad_year(chrono::Local::now().date_naive()))
    }
}

fn mask(value: &str) -> String {
    let head: String = value.chars().take(4).collect();
    if head.len() == value.len() {
        "****".to_string()
    } else {
        format!("{head}****")
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "canvas_host:         {}", self.canvas_host)?;
        writeln!(f, "canvas_access_token: {}", mask(&self.canvas_token))?;
        writeln!(f, "root_account:        {}", self.root_account)?;
        writeln!(f, "crm_host:            {}", self.crm_host)?;
        writeln!(f, "crm_api_key:         {}", mask(&self.crm_api_key))?;
        writeln!(f, "crm_site_key:        {}", mask(&self.crm_site_key))?;
        writeln!(f, "current_term_name:   {}", self.current_term_name)?;
        writeln!(f, "current_period_name: {}", self.current_period_name)?;
        writeln!(f, "current_grad_year:   {:?}", self.current_grad_year)?;
        writeln!(f, "zero_blanks:         {}", self.zero_blanks)?;
        writeln!(f, "student domain:      {}", self.student_email_domain)?;
        writeln!(f, "database_path:       {}", self.database_path)?;
        writeln!(f, "output_dir:          {}", self.output_dir.display())?;
        match &self.smtp {
            Some(s) => writeln!(f, "smtp:                {}:{} as {}", s.host, s.port, s.username),
            None => writeln!(f, "smtp:                (not configured)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_short_secrets() {
        assert_eq!(mask("ab"), "****");
        assert_eq!(mask("abcdefgh"), "abcd****");
        assert_eq!(mask("clé-secrète"), "clé-****");
    }

    #[test]
    fn parses_holiday_ranges() {
        let start = NaiveDate::from_ymd_opt(2025, 11, 24).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 11, 28).unwrap();
        assert_eq!(parse_date("school_holidays", "2025-11-24").unwrap(), start);
        assert_eq!(parse_date("school_holidays", "2025-11-28").unwrap(), end);
    }
}
