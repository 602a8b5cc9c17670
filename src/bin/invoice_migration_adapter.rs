use invoice_migration::{
    apply_embedded_migrations, import_data_migration, init_tracing, inspect_status_at_path,
    ledger_table_counts, open_migrated_ledger, reconcile_invoice_bill_items, MigrationConfig,
    MigrationError, RowFailure, RunContext,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    command: Option<String>,
    entity: Option<String>,
    csv_path: Option<String>,
    db_path: Option<String>,
    config_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct RowErrorBody {
    row_number: usize,
    class: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected_rows: Vec<RowErrorBody>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

fn row_error_bodies(rows: &[RowFailure]) -> Vec<RowErrorBody> {
    rows.iter()
        .map(|f| RowErrorBody {
            row_number: f.row_number,
            class: f.error.class().as_str(),
            message: f.error.to_string(),
        })
        .collect()
}

fn protocol_error(message: impl Into<String>) -> AdapterErrorBody {
    AdapterErrorBody {
        category: "ADAPTER_PROTOCOL_ERROR".to_string(),
        message: message.into(),
        error_type: "AdapterError".to_string(),
        rejected_rows: Vec::new(),
    }
}

impl From<MigrationError> for AdapterErrorBody {
    fn from(err: MigrationError) -> Self {
        AdapterErrorBody {
            category: err.category().to_string(),
            message: err.to_string(),
            error_type: "MigrationError".to_string(),
            rejected_rows: row_error_bodies(err.rejected_rows()),
        }
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> Result<Value, AdapterErrorBody> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| protocol_error(format!("read stdin failed: {e}")))?;
    if raw.trim().is_empty() {
        return Err(protocol_error("empty stdin request"));
    }
    serde_json::from_str::<Value>(&raw)
        .map_err(|e| protocol_error(format!("invalid JSON request: {e}")))
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AdapterErrorBody> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| protocol_error(format!("request.{field} missing")))
}

fn dispatch(req: AdapterRequest) -> Result<Value, AdapterErrorBody> {
    if req.schema_version != 1 {
        return Err(protocol_error(format!(
            "unsupported schema_version: {}",
            req.schema_version
        )));
    }
    let command = required(&req.command, "command")?;

    let config = MigrationConfig::load(req.config_path.as_deref().map(Path::new))?;
    let db_path = req
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| config.db_path.clone());
    tracing::info!(command, db = %db_path.display(), "dispatching adapter request");

    match command {
        "import" => {
            let entity = required(&req.entity, "entity")?;
            let csv_path = required(&req.csv_path, "csv_path")?;
            let payload = fs::read(csv_path).map_err(MigrationError::from)?;
            let ctx = RunContext::from_config(&config)?;
            let mut conn = open_migrated_ledger(&db_path)?;
            let result = import_data_migration(&mut conn, entity, &payload, &ctx)?;
            Ok(json!({
                "db_path": db_path.to_string_lossy().to_string(),
                "entity": result.entity,
                "job_id": result.job_id,
                "imported_count": result.imported_count,
                "error_count": result.errors.len(),
                "errors": row_error_bodies(&result.errors),
            }))
        }
        "reconcile" => {
            let ctx = RunContext::from_config(&config)?;
            let mut conn = open_migrated_ledger(&db_path)?;
            let report = reconcile_invoice_bill_items(&mut conn, &ctx)?;
            Ok(serde_json::to_value(report).map_err(MigrationError::from)?)
        }
        "migrate" => {
            let result = apply_embedded_migrations(&db_path)?;
            Ok(serde_json::to_value(result).map_err(MigrationError::from)?)
        }
        "status" => {
            let status = inspect_status_at_path(&db_path)?;
            let table_counts = if status.ready {
                let conn = open_migrated_ledger(&db_path)?;
                ledger_table_counts(&conn)?
            } else {
                Vec::new()
            };
            Ok(json!({
                "status": status,
                "table_counts": table_counts,
            }))
        }
        _ => Err(AdapterErrorBody {
            category: "UNSUPPORTED_COMMAND".to_string(),
            ..protocol_error(format!("unsupported command: {command}"))
        }),
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");
    if verbose {
        init_tracing();
    }

    let resp = match read_stdin_json()
        .and_then(|v| {
            serde_json::from_value::<AdapterRequest>(v)
                .map_err(|e| protocol_error(format!("request root invalid: {e}")))
        })
        .and_then(dispatch)
    {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(error) => AdapterResponse::Error { error },
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}
