use std::io::Write;

use serde::Serialize;

use crate::config::{DumpArgs, GatewayConfig};
use crate::error::GatewayError;
use score_api::{LogClient, ScoreUpdate, decode_update};
use score_log::{LogConfig, PartitionedLog};

#[derive(Serialize)]
struct DumpLine<'a> {
    partition: u32,
    offset: u64,
    #[serde(flatten)]
    update: &'a ScoreUpdate,
}

/// Replay the partition files and print every record, one JSON object per
/// line. The files are only read, so a running gateway is left alone.
pub async fn run(args: DumpArgs) -> Result<(), GatewayError> {
    let config = GatewayConfig::load(&args.config)?;
    let Some(dir) = args.data_dir.or(config.log.data_dir.clone()) else {
        return Err(GatewayError::Config {
            context: "dump",
            detail: "log.data_dir is not set; nothing is persisted".into(),
        });
    };
    if !dir.is_dir() {
        return Err(GatewayError::Config {
            context: "dump",
            detail: format!("'{}' is not a directory", dir.display()),
        });
    }

    let log = PartitionedLog::open_read_only(&LogConfig {
        data_dir: Some(dir),
        retained_records: usize::MAX,
        ..config.log
    })?;

    let partitions: Vec<u32> = match args.partition {
        Some(p) => vec![p],
        None => (0..log.partition_count()).collect(),
    };
    let limit = args.limit.unwrap_or(usize::MAX);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0u64;
    let mut undecodable = 0u64;

    for partition in partitions {
        for record in log.read(partition, args.from, limit)? {
            match decode_update(&record.payload) {
                Ok(update) => {
                    let line = DumpLine {
                        partition,
                        offset: record.offset,
                        update: &update,
                    };
                    serde_json::to_writer(&mut out, &line)?;
                    writeln!(out)?;
                    printed += 1;
                }
                Err(e) => {
                    undecodable += 1;
                    tracing::warn!(partition, offset = record.offset, error = %e, "undecodable record");
                }
            }
        }
    }
    out.flush()?;

    tracing::info!(printed, undecodable, "dump complete");
    Ok(())
}
