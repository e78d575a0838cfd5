//! Report rendering: the cache goes out as HTML documents, optionally
//! converted to PDF with wkhtmltopdf when it is installed.

pub mod report_card;
pub mod roll_book;
pub mod roster;
pub mod schedule;
pub mod slips;

use std::path::{Path, PathBuf};
use tera::Tera;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report data error: {0}")]
    Data(String),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Embedded tera templates for every report type.
pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn new() -> ReportResult<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("page.html", include_str!("templates/page.html"))?;
        tera.add_raw_template("report_card.html", include_str!("templates/report_card.html"))?;
        tera.add_raw_template(
            "report_card_ls.html",
            include_str!("templates/report_card_ls.html"),
        )?;
        tera.add_raw_template("roster.html", include_str!("templates/roster.html"))?;
        tera.add_raw_template("schedule.html", include_str!("templates/schedule.html"))?;
        tera.add_raw_template("roll_book.html", include_str!("templates/roll_book.html"))?;
        tera.add_raw_template("slip.html", include_str!("templates/slip.html"))?;
        Ok(Self { tera })
    }

    pub fn render(&self, template: &str, context: &tera::Context) -> ReportResult<String> {
        Ok(self.tera.render(template, context)?)
    }

    /// Wrap rendered report bodies into a full HTML document.
    pub fn page(&self, title: &str, css: &str, bodies: &[String]) -> ReportResult<String> {
        let mut context = tera::Context::new();
        context.insert("title", title);
        context.insert("css", css);
        context.insert("body", &bodies.concat());
        self.render("page.html", &context)
    }
}

/// Writes finished documents under the configured output directory,
/// mirroring the `generated_docs/{term}/{period}` layout.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.output_dir
    }

    /// Directory for a term/period batch, created on demand.
    pub fn period_dir(&self, term_name: &str, period_name: &str) -> ReportResult<PathBuf> {
        let dir = self.output_dir.join(term_name).join(period_name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn write_html(&self, path: &Path, html: &str) -> ReportResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, html)?;
        info!("Wrote {}", path.display());
        Ok(())
    }

    /// Convert an HTML document to PDF with wkhtmltopdf. Returns false
    /// (with a warning) when the tool is not installed.
    pub async fn to_pdf(&self, html_path: &Path, pdf_path: &Path) -> ReportResult<bool> {
        let status = tokio::process::Command::new("wkhtmltopdf")
            .arg("--enable-local-file-access")
            .args(["--page-size", "letter"])
            .args(["--orientation", "portrait"])
            .args(["--margin-top", "2cm"])
            .args(["--margin-right", "2cm"])
            .args(["--margin-bottom", "1cm"])
            .args(["--margin-left", "2cm"])
            .args(["--encoding", "UTF-8"])
            .arg("--disable-smart-shrinking")
            .arg(html_path)
            .arg(pdf_path)
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {
                info!("Wrote {}", pdf_path.display());
                Ok(true)
            }
            Ok(status) => {
                warn!("wkhtmltopdf exited with {status} for {}", html_path.display());
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("wkhtmltopdf is not installed, leaving HTML only");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// "502 555-0188" from a digits-only phone column.
pub fn format_phone(digits: &str) -> String {
    if digits.len() < 7 {
        return digits.to_string();
    }
    let split = digits.len() - 4;
    format!(
        "{} {}-{}",
        &digits[..3],
        &digits[3..split],
        &digits[split..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formatting() {
        assert_eq!(format_phone("5025550188"), "502 555-0188");
        assert_eq!(format_phone("555"), "555");
    }

    #[test]
    fn page_wraps_bodies() {
        let templates = Templates::new().unwrap();
        let html = templates
            .page(
                "Report Cards",
                "progressreport.css",
                &["<div>a</div>".to_string(), "<div>b</div>".to_string()],
            )
            .unwrap();
        assert!(html.contains("<title>Report Cards</title>"));
        assert!(html.contains("<div>a</div><div>b</div>"));
    }
}
