use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use crate::canvas::{CanvasClient, CanvasPush, CanvasSync, ColumnMode};
use crate::config::Config;
use crate::crm::{CrmClient, CrmSync};
use crate::db::{Database, GradingPeriod, Term};
use crate::export::{accounts, xlsx::Exporter, ExportFilter};
use crate::mail::{Mailer, SendFilter};
use crate::reports::report_card::{CardVariant, ReportCards};
use crate::reports::roll_book::RollBooks;
use crate::reports::roster::Rosters;
use crate::reports::schedule::Schedules;
use crate::reports::slips::Slips;
use crate::reports::ReportWriter;

/// Registrar - school records sync and reporting
#[derive(Parser)]
#[command(name = "registrar")]
#[command(about = "Sync school records between Canvas, CiviCRM and a local cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull data from Canvas and the CRM into the local cache
    Sync(SyncArgs),

    /// Push cached data and settings up to Canvas
    Canvas(CanvasArgs),

    /// CRM maintenance operations
    Crm(CrmArgs),

    /// Import CSV files into the cache or Canvas
    Import(ImportArgs),

    /// Generate HTML/PDF documents from the cache
    Report(ReportArgs),

    /// Export spreadsheets from the cache
    Export(ExportArgs),

    /// Send credential mail to parents
    Email(EmailArgs),

    /// Show configuration information
    Config(ConfigArgs),

    /// Database operations
    Db(DbArgs),
}

#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommands,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Terms, grading periods, accounts, grading standards and CRM fields
    Init,

    /// Students and parents from the CRM, teachers and Canvas ids
    People,

    /// Courses for the current term
    Courses,

    /// Section enrollment and course teachers
    Enrollments,

    /// Grade records for the current period
    Grades {
        /// Pull midterm (in-progress) grades instead of period grades
        #[arg(long)]
        midterm: bool,

        /// Pull every period of the term up to the current one
        #[arg(long)]
        cumulative: bool,

        /// Pull whole-term final grades as well
        #[arg(long = "final")]
        final_grades: bool,

        /// Skip the comment columns
        #[arg(long)]
        no_comments: bool,

        /// Only courses whose SIS id contains this string
        #[arg(long)]
        course: Option<String>,
    },

    /// Everything: init, people, courses, enrollments and grades
    Full {
        /// Skip the comment columns
        #[arg(long)]
        no_comments: bool,
    },
}

#[derive(Args)]
pub struct CanvasArgs {
    #[command(subcommand)]
    pub command: CanvasCommands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ColumnModeArg {
    /// Teachers can see and edit the column
    Visible,
    /// Teachers can see but not edit
    Protected,
    /// Hidden from teachers
    Hidden,
}

impl From<ColumnModeArg> for ColumnMode {
    fn from(arg: ColumnModeArg) -> Self {
        match arg {
            ColumnModeArg::Visible => ColumnMode::Visible,
            ColumnModeArg::Protected => ColumnMode::Protected,
            ColumnModeArg::Hidden => ColumnMode::Hidden,
        }
    }
}

#[derive(Subcommand)]
pub enum CanvasCommands {
    /// Update student names and emails in Canvas from the cache
    Push {
        /// Create students Canvas does not know yet
        #[arg(long)]
        add_missing: bool,

        /// SIS id prefix to push
        #[arg(long, default_value = "s")]
        prefix: String,
    },

    /// Create or update the comment column on every current-term course
    CommentColumn {
        /// Column title; defaults to the current period's column
        #[arg(long)]
        name: Option<String>,

        /// Column visibility for teachers
        #[arg(long, value_enum, default_value = "protected")]
        mode: ColumnModeArg,

        /// Use the midterm comment column
        #[arg(long)]
        midterm: bool,
    },

    /// Hide grade distribution graphs on every current-term course
    HideStats,
}

#[derive(Args)]
pub struct CrmArgs {
    #[command(subcommand)]
    pub command: CrmCommands,
}

#[derive(Subcommand)]
pub enum CrmCommands {
    /// Refresh the custom field map
    Fields,

    /// Pull current students (assigns emails, deactivates leavers)
    Students,

    /// Pull parent contact info for cached students
    Parents,

    /// Assign student ids to CRM contacts that lack one
    AssignIds {
        /// Id prefix, also selects which contacts to consider
        #[arg(long, default_value = "s1")]
        starts_with: String,
    },
}

#[derive(Args)]
pub struct ImportArgs {
    #[command(subcommand)]
    pub command: ImportCommands,
}

#[derive(Subcommand)]
pub enum ImportCommands {
    /// Attendance counts for the current period from an ID,STATUS sheet
    Attendance {
        /// CSV file to read
        file: PathBuf,
    },

    /// Create Canvas courses from a course sheet
    Courses {
        /// CSV file to read
        file: PathBuf,
    },

    /// Reconcile a Google users.csv export against the cache
    GoogleAccounts {
        /// users.csv exported from the admin console
        input: PathBuf,

        /// Merged CSV to write
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum, PartialEq)]
pub enum CardVariantArg {
    Upper,
    Lower,
    Partner,
    All,
}

#[derive(Args)]
pub struct ReportArgs {
    #[command(subcommand)]
    pub command: ReportCommands,
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Report cards for the current period
    Cards {
        /// Include whole-term final grades
        #[arg(long = "final")]
        final_grades: bool,

        /// Which layout(s) to generate
        #[arg(long, value_enum, default_value = "all")]
        variant: CardVariantArg,
    },

    /// Homeroom rosters with parent contact info
    Rosters,

    /// Per-student course schedules
    Schedules,

    /// Attendance roll books for one campus
    RollBooks {
        /// Two-letter campus code from the course SIS ids
        campus: String,
    },

    /// Family slips with grade, campus and homeroom teacher
    Slips,
}

#[derive(Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub command: ExportCommands,

    /// Output file; defaults into the configured output directory
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// SIS id prefix filter
    #[arg(long, global = true, default_value = "s")]
    pub prefix: String,
}

#[derive(Subcommand)]
pub enum ExportCommands {
    /// Absence and tardy counts for the term
    Attendance,

    /// Class enrollment for the term
    Classes {
        /// Homeroom courses only
        #[arg(long)]
        homeroom: bool,
    },

    /// Full grade export for the term (grades 3-12)
    Grades,

    /// Grade records for the current period
    PeriodGrades {
        /// Midterm records instead of period records
        #[arg(long)]
        midterm: bool,
    },

    /// Current students with emails and passwords
    Students,

    /// Google-import student account sheet
    Accounts,

    /// Standardized-test label order sheet (grades K-8)
    Itbs,
}

#[derive(Args)]
pub struct EmailArgs {
    #[command(subcommand)]
    pub command: EmailCommands,
}

#[derive(Subcommand)]
pub enum EmailCommands {
    /// Send each family their students' account credentials
    Credentials {
        /// Skip parents up to and including this CRM id
        #[arg(long)]
        resume_from: Option<String>,

        /// Only parents with this last name
        #[arg(long)]
        surname: Option<String>,
    },
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the loaded configuration with secrets masked
    Show,
}

#[derive(Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommands,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Show cache row counts
    Stats,
}

/// Command-line interface handler
pub struct CliHandler {
    db: Arc<Database>,
    config: Arc<Config>,
}

impl CliHandler {
    pub async fn new(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database_path).await?);
        Ok(Self {
            db,
            config: Arc::new(config),
        })
    }

    fn canvas_sync(&self) -> Result<CanvasSync> {
        let client = CanvasClient::new(&self.config.canvas_host, &self.config.canvas_token)?;
        Ok(CanvasSync::new(
            client,
            Arc::clone(&self.db),
            Arc::clone(&self.config),
        ))
    }

    fn canvas_push(&self) -> Result<CanvasPush> {
        let client = CanvasClient::new(&self.config.canvas_host, &self.config.canvas_token)?;
        Ok(CanvasPush::new(
            client,
            Arc::clone(&self.db),
            Arc::clone(&self.config),
        ))
    }

    fn crm_sync(&self) -> Result<CrmSync> {
        let client = CrmClient::new(
            &self.config.crm_host,
            &self.config.crm_api_key,
            &self.config.crm_site_key,
        )?;
        Ok(CrmSync::new(
            client,
            Arc::clone(&self.db),
            Arc::clone(&self.config),
        ))
    }

    fn writer(&self) -> ReportWriter {
        ReportWriter::new(&self.config.output_dir)
    }

    /// Current term from the cache only, for offline subcommands.
    async fn cached_term(&self) -> Result<Term> {
        self.db
            .term_by_name(&self.config.current_term_name)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "term '{}' is not cached yet, run `registrar sync init` first",
                    self.config.current_term_name
                )
            })
    }

    async fn cached_period(&self) -> Result<GradingPeriod> {
        let term = self.cached_term().await?;
        let group = term
            .gp_group_id
            .ok_or_else(|| anyhow!("term '{}' has no grading period group", term.term_name))?;
        self.db
            .period_in_group(group, &self.config.current_period_name)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "period '{}' is not cached for term '{}'",
                    self.config.current_period_name,
                    term.term_name
                )
            })
    }

    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Sync(args) => self.handle_sync(args.command).await,
            Commands::Canvas(args) => self.handle_canvas(args.command).await,
            Commands::Crm(args) => self.handle_crm(args.command).await,
            Commands::Import(args) => self.handle_import(args.command).await,
            Commands::Report(args) => self.handle_report(args.command).await,
            Commands::Export(args) => {
                self.handle_export(args.command, args.output, args.prefix)
                    .await
            }
            Commands::Email(args) => self.handle_email(args.command).await,
            Commands::Config(args) => match args.command {
                ConfigCommands::Show => {
                    print!("{}", self.config);
                    Ok(())
                }
            },
            Commands::Db(args) => match args.command {
                DbCommands::Stats => {
                    let stats = self.db.stats().await?;
                    print!("{stats}");
                    Ok(())
                }
            },
        }
    }

    async fn sync_init(&self, sync: &CanvasSync) -> Result<()> {
        sync.pull_terms().await?;
        sync.pull_grading_periods().await?;
        sync.pull_accounts().await?;
        sync.pull_grading_standards().await?;
        self.crm_sync()?.pull_custom_fields().await?;
        println!("Terms, periods, accounts, standards and CRM fields updated");
        Ok(())
    }

    async fn sync_people(&self, sync: &CanvasSync) -> Result<()> {
        let crm = self.crm_sync()?;
        let students = crm.pull_students().await?;
        crm.pull_parents().await?;
        crm.set_active_parents().await?;
        sync.pull_teachers().await?;
        sync.pull_student_canvas_ids("s").await?;
        println!("{students} students updated from the CRM");
        Ok(())
    }

    async fn sync_enrollments(&self, sync: &CanvasSync, term: &Term) -> Result<()> {
        let courses = self.db.term_courses(term.term_id).await?;
        for course in &courses {
            sync.pull_enrollment(course).await?;
            sync.pull_course_teachers(course).await?;
        }
        println!("Enrollment updated for {} courses", courses.len());
        Ok(())
    }

    async fn handle_sync(&self, command: SyncCommands) -> Result<()> {
        let sync = self.canvas_sync()?;
        match command {
            SyncCommands::Init => self.sync_init(&sync).await,
            SyncCommands::People => self.sync_people(&sync).await,
            SyncCommands::Courses => {
                let term = sync.current_term().await?;
                sync.pull_courses(&term).await?;
                println!("Courses updated for term '{}'", term.term_name);
                Ok(())
            }
            SyncCommands::Enrollments => {
                let term = sync.current_term().await?;
                self.sync_enrollments(&sync, &term).await
            }
            SyncCommands::Grades {
                midterm,
                cumulative,
                final_grades,
                no_comments,
                course,
            } => {
                let term = sync.current_term().await?;
                let period = sync.current_period().await?;
                let periods = if cumulative {
                    self.db.cumulative_periods(&period).await?
                } else {
                    vec![period]
                };
                let comments = !no_comments;
                for c in self.db.term_courses(term.term_id).await? {
                    if let Some(filter) = &course {
                        if !c.sis_id.contains(filter) {
                            continue;
                        }
                    }
                    for p in &periods {
                        if midterm {
                            sync.pull_midterm_records(&c, p, comments).await?;
                        } else {
                            sync.pull_trimester_records(&c, p, comments).await?;
                        }
                    }
                    if final_grades {
                        sync.pull_term_grades(&c, &term).await?;
                    }
                }
                println!("Grade records updated");
                Ok(())
            }
            SyncCommands::Full { no_comments } => {
                self.sync_init(&sync).await?;
                self.sync_people(&sync).await?;
                let term = sync.current_term().await?;
                sync.pull_courses(&term).await?;
                self.sync_enrollments(&sync, &term).await?;
                let period = sync.current_period().await?;
                for c in self.db.term_courses(term.term_id).await? {
                    sync.pull_trimester_records(&c, &period, !no_comments)
                        .await?;
                }
                println!("Full sync complete");
                Ok(())
            }
        }
    }

    async fn handle_canvas(&self, command: CanvasCommands) -> Result<()> {
        let push = self.canvas_push()?;
        match command {
            CanvasCommands::Push {
                add_missing,
                prefix,
            } => {
                let pushed = push.push_students(&prefix, add_missing).await?;
                println!("{pushed} students pushed to Canvas");
                Ok(())
            }
            CanvasCommands::CommentColumn {
                name,
                mode,
                midterm,
            } => {
                let period = self.cached_period().await?;
                let column_name = match name {
                    Some(name) => name,
                    None => match period.comment_column(midterm) {
                        Some(name) => name.to_string(),
                        None => {
                            let guessed = period.default_comment_column(midterm);
                            self.db
                                .set_period_comment_column(period.period_id, midterm, &guessed)
                                .await?;
                            guessed
                        }
                    },
                };
                let term = self.cached_term().await?;
                let mut updated = 0;
                for course in self.db.term_courses(term.term_id).await? {
                    if course.canvas_id.is_none() {
                        continue;
                    }
                    push.set_comment_column(&course, &column_name, mode.into())
                        .await?;
                    updated += 1;
                }
                println!("'{column_name}' column set on {updated} courses");
                Ok(())
            }
            CanvasCommands::HideStats => {
                let term = self.cached_term().await?;
                for course in self.db.term_courses(term.term_id).await? {
                    if course.canvas_id.is_some() {
                        push.hide_stats(&course).await?;
                    }
                }
                println!("Grade distribution graphs hidden");
                Ok(())
            }
        }
    }

    async fn handle_crm(&self, command: CrmCommands) -> Result<()> {
        let crm = self.crm_sync()?;
        match command {
            CrmCommands::Fields => {
                crm.pull_custom_fields().await?;
                println!("CRM field map updated");
                Ok(())
            }
            CrmCommands::Students => {
                let count = crm.pull_students().await?;
                println!("{count} students updated from the CRM");
                Ok(())
            }
            CrmCommands::Parents => {
                crm.pull_parents().await?;
                crm.set_active_parents().await?;
                println!("Parent records updated");
                Ok(())
            }
            CrmCommands::AssignIds { starts_with } => {
                let assigned = crm.assign_student_ids(&starts_with).await?;
                println!("{assigned} student ids assigned");
                Ok(())
            }
        }
    }

    async fn handle_import(&self, command: ImportCommands) -> Result<()> {
        match command {
            ImportCommands::Attendance { file } => {
                let period = self.cached_period().await?;
                let imported = crate::import::import_attendance(&self.db, &period, &file).await?;
                println!(
                    "Attendance imported for {imported} students into '{}'",
                    period.period_name
                );
                Ok(())
            }
            ImportCommands::Courses { file } => {
                let term = self.cached_term().await?;
                let push = self.canvas_push()?;
                let created = crate::import::import_courses(&self.db, &push, &term, &file).await?;
                println!("{created} courses created in term '{}'", term.term_name);
                Ok(())
            }
            ImportCommands::GoogleAccounts { input, output } => {
                let total = accounts::reconcile_google_accounts(&self.db, &input, &output).await?;
                println!("{total} accounts written to {}", output.display());
                Ok(())
            }
        }
    }

    async fn handle_report(&self, command: ReportCommands) -> Result<()> {
        let writer = self.writer();
        match command {
            ReportCommands::Cards {
                final_grades,
                variant,
            } => {
                let period = self.cached_period().await?;
                let cards = ReportCards::new(Arc::clone(&self.db), Arc::clone(&self.config))?;
                let variants: Vec<CardVariant> = match variant {
                    CardVariantArg::Upper => vec![CardVariant::Upper],
                    CardVariantArg::Lower => vec![CardVariant::Lower],
                    CardVariantArg::Partner => vec![CardVariant::Partner],
                    CardVariantArg::All => {
                        vec![CardVariant::Upper, CardVariant::Lower, CardVariant::Partner]
                    }
                };
                for v in variants {
                    let path = cards.write_batch(&writer, &period, final_grades, v).await?;
                    println!("Wrote {}", path.display());
                }
                Ok(())
            }
            ReportCommands::Rosters => {
                let term = self.cached_term().await?;
                let rosters = Rosters::new(Arc::clone(&self.db))?;
                let path = rosters.write_all(&writer, term.term_id).await?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ReportCommands::Schedules => {
                let term = self.cached_term().await?;
                let schedules = Schedules::new(Arc::clone(&self.db), Arc::clone(&self.config))?;
                let path = schedules.write_all(&writer, &term).await?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ReportCommands::RollBooks { campus } => {
                let term = self.cached_term().await?;
                let books = RollBooks::new(Arc::clone(&self.db), Arc::clone(&self.config))?;
                let path = books.write_campus(&writer, term.term_id, &campus).await?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ReportCommands::Slips => {
                let term = self.cached_term().await?;
                let slips = Slips::new(Arc::clone(&self.db), Arc::clone(&self.config))?;
                let path = slips.write_all(&writer, &term).await?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }

    async fn handle_export(
        &self,
        command: ExportCommands,
        output: Option<PathBuf>,
        prefix: String,
    ) -> Result<()> {
        let exporter = Exporter::new(Arc::clone(&self.db), Arc::clone(&self.config));
        let filter = ExportFilter {
            id_prefix: prefix,
            ..ExportFilter::default()
        };
        let out = |default: String| {
            output
                .clone()
                .unwrap_or_else(|| self.config.output_dir.join(default))
        };
        match command {
            ExportCommands::Attendance => {
                let term = self.cached_term().await?;
                let path = out(format!("attendance {}.xlsx", term.term_name));
                exporter.attendance(&term, &filter, &path).await?;
            }
            ExportCommands::Classes { homeroom } => {
                let term = self.cached_term().await?;
                let path = out(format!("{}.xlsx", term.term_name));
                exporter.classes(&term, &filter, homeroom, &path).await?;
            }
            ExportCommands::Grades => {
                let term = self.cached_term().await?;
                let path = out(format!("{} full term export.xlsx", term.term_name));
                let filter = filter.grades(3, 12);
                exporter.term_grades(&term, &filter, &path).await?;
            }
            ExportCommands::PeriodGrades { midterm } => {
                let period = self.cached_period().await?;
                let path = out(format!("{}.xlsx", period.period_name));
                exporter
                    .period_grades(&period, midterm, &filter, &path)
                    .await?;
            }
            ExportCommands::Students => {
                let path = out("current_students.xlsx".to_string());
                exporter.students(&filter, &path).await?;
            }
            ExportCommands::Accounts => {
                let path = out("student_accounts_export.xlsx".to_string());
                exporter.student_accounts(&filter, &path).await?;
            }
            ExportCommands::Itbs => {
                let term = self.cached_term().await?;
                let path = out(format!("ITBS_{}.xlsx", term.term_name));
                let filter = filter.grades(0, 8);
                exporter.itbs_labels(&term, &filter, &path).await?;
            }
        }
        Ok(())
    }

    async fn handle_email(&self, command: EmailCommands) -> Result<()> {
        match command {
            EmailCommands::Credentials {
                resume_from,
                surname,
            } => {
                let mailer = Mailer::new(Arc::clone(&self.db), Arc::clone(&self.config))?;
                let sent = mailer
                    .send_credentials(&SendFilter {
                        resume_from,
                        surname,
                    })
                    .await?;
                println!("{sent} credential emails sent");
                Ok(())
            }
        }
    }
}
