use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn start_session(&self, period: u32, class: &str) -> zbus::Result<String>;
    fn stop_session(&self) -> zbus::Result<String>;
    fn save_session(&self, date: &str, recorded_by: &str) -> zbus::Result<String>;
    fn mark_student(&self, student_id: &str, status: &str) -> zbus::Result<String>;
    fn register_student(
        &self,
        id: &str,
        name: &str,
        reg_no: &str,
        class: &str,
        photo: &str,
    ) -> zbus::Result<()>;
    fn records(&self, date: &str, period: u32) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall live attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a live session for a period
    Start {
        /// Timetable period number
        period: u32,
        /// Class/section to enroll (default: every student)
        #[arg(short, long, default_value = "")]
        class: String,
    },
    /// Stop the running session and release the camera
    Stop,
    /// Save the session as attendance records
    Save {
        /// Who is recording attendance
        #[arg(short = 'b', long)]
        by: String,
        /// Date as YYYY-MM-DD (default: today)
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// Override one student's status before saving
    Mark {
        student_id: String,
        /// present | absent | sleepy | talking | not-attentive
        status: String,
    },
    /// Add or update a student in the directory
    Register {
        id: String,
        #[arg(short, long)]
        name: String,
        /// Registration number
        #[arg(short, long)]
        reg_no: String,
        /// Class/section, e.g. CSE-A
        #[arg(short, long)]
        class: String,
        /// Reference photo used to recognize the student
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },
    /// Show daemon and session status
    Status,
    /// List saved records for a date and period
    Report {
        period: u32,
        /// Date as YYYY-MM-DD (default: today)
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// List capture-capable V4L2 devices
    Devices,
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn print_counts(summary: &Value) {
    let count = |key: &str| summary.get(key).and_then(Value::as_u64).unwrap_or(0);
    println!(
        "present {}  absent {}  sleepy {}  talking {}  not-attentive {}  ({}% present of {})",
        count("present"),
        count("absent"),
        count("sleepy"),
        count("talking"),
        count("not_attentive"),
        count("present_pct"),
        count("total"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        let devices = rollcall_hw::Camera::list_devices();
        tracing::debug!(count = devices.len(), "enumerated V4L2 devices");
        if devices.is_empty() {
            println!("no capture devices found");
        }
        for device in devices {
            println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
        }
        return Ok(());
    }

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;
    tracing::debug!("connected to rollcalld");

    match cli.command {
        Commands::Start { period, class } => {
            let session_id = proxy.start_session(period, &class).await?;
            println!("session {session_id} started for period {period}");
        }
        Commands::Stop => {
            let summary: Value = serde_json::from_str(&proxy.stop_session().await?)?;
            println!("session stopped");
            print_counts(&summary);
        }
        Commands::Save { by, date } => {
            let report: Value = serde_json::from_str(&proxy.save_session(&date, &by).await?)?;
            println!(
                "saved {} records",
                report.get("written").and_then(Value::as_u64).unwrap_or(0)
            );
        }
        Commands::Mark { student_id, status } => {
            let applied = proxy.mark_student(&student_id, &status).await?;
            println!("{student_id}: {applied}");
        }
        Commands::Register {
            id,
            name,
            reg_no,
            class,
            photo,
        } => {
            // The daemon opens the photo itself, so hand it an absolute path.
            let photo = match photo {
                Some(path) => std::fs::canonicalize(&path)
                    .with_context(|| format!("photo {} not found", path.display()))?
                    .to_string_lossy()
                    .into_owned(),
                None => String::new(),
            };
            proxy
                .register_student(&id, &name, &reg_no, &class, &photo)
                .await?;
            println!("registered {id} in {class}");
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("rollcalld {}", field(&status, "version"));
            match status.get("session").filter(|s| !s.is_null()) {
                None => println!("no session"),
                Some(session) => {
                    println!(
                        "session {} period {} ({}), {} face(s) in view",
                        field(session, "session_id"),
                        session.get("period").and_then(Value::as_u64).unwrap_or(0),
                        field(session, "phase"),
                        session.get("faces_in_view").and_then(Value::as_u64).unwrap_or(0),
                    );
                    if let Some(summary) = session.get("summary") {
                        print_counts(summary);
                    }
                    match session.get("coverage").filter(|c| !c.is_null()) {
                        None => println!("building signatures..."),
                        Some(coverage) => {
                            let notes = coverage
                                .get("notes")
                                .and_then(Value::as_array)
                                .map_or(0, Vec::len);
                            println!(
                                "{} signature(s), {} student(s) not recognizable",
                                coverage.get("signatures").and_then(Value::as_u64).unwrap_or(0),
                                notes
                            );
                        }
                    }
                }
            }
        }
        Commands::Report { period, date } => {
            let records: Vec<Value> = serde_json::from_str(&proxy.records(&date, period).await?)?;
            if records.is_empty() {
                println!("no records");
            }
            for record in &records {
                println!(
                    "{:<12} {:<14} {}",
                    field(record, "student_id"),
                    field(record, "status"),
                    field(record, "recorded_by"),
                );
            }
        }
        Commands::Devices => {}
    }

    Ok(())
}
