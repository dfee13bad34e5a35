use anyhow::{Context, Result};
use chronicle_events::EventStore;
use chronicle_manager::{Backend, CancellationToken, RepairManager};
use chronicle_repair::RepairPolicy;
use chronicle_store::RewriteProvider;

use crate::cli::{Cli, Command};
use crate::config::{Config, ProviderKind};
use crate::exit::{self, BAD_INPUT, REPAIR_DECLINED, SUCCESS};
use crate::output;

fn build_manager(config: &Config) -> RepairManager {
    let policy = RepairPolicy {
        min_score: config.min_similarity_score,
        top_k: config.top_k_candidates,
    };

    let backend = match config.provider {
        ProviderKind::Rewrite => {
            let provider = RewriteProvider::new(&config.session_dir, &config.backup_dir)
                .with_undo_stack_depth(config.undo_stack_depth);
            Backend::rewrite(provider)
        }
        ProviderKind::EventStore => Backend::event_sourced(EventStore::new(&config.event_store_endpoint)),
    };

    RepairManager::new(&config.session_dir, backend, &config.operator_id)
        .with_policy(policy)
        .with_oversize_record_bytes(config.oversize_record_bytes)
}

/// Dispatches the parsed command and returns the process exit code
/// (spec.md §6), rather than a success/failure bool, so the caller can
/// distinguish "declined" from "bad input" from "backend unavailable".
pub fn run(cli: &Cli, config: &Config) -> Result<i32> {
    let manager = build_manager(config);

    match &cli.command {
        Command::Scan { session } => {
            let report = manager.scan(session).context("scan failed")?;
            output::emit(&output::ScanReportView::from(&report), || output::scan_report_text(&report), cli.json);
            Ok(SUCCESS)
        }
        Command::ProposeFixes { session } => {
            let proposals = manager.propose_fixes(session).context("propose_fixes failed")?;
            let declined = !proposals.is_empty() && proposals.iter().all(|set| set.no_valid_candidates);
            output::emit(&proposals, || output::proposal_sets_text(&proposals), cli.json);
            Ok(if declined { REPAIR_DECLINED } else { SUCCESS })
        }
        Command::Apply { session, target } => {
            let proposals = manager.propose_fixes(session).context("propose_fixes failed")?;
            let Some(set) = proposals.iter().find(|set| &set.target_uuid == target) else {
                eprintln!("no orphaned record `{target}` found in session `{session}`");
                return Ok(BAD_INPUT);
            };
            let Some(winner) = set.accepted.first() else {
                println!("no_valid_candidates for {target}");
                return Ok(REPAIR_DECLINED);
            };

            let token = CancellationToken::new();
            match manager.apply(session, winner, &token) {
                Ok(applied) => {
                    output::emit(&applied, || output::applied_repair_text(&applied), cli.json);
                    Ok(SUCCESS)
                }
                Err(error) => {
                    let code = exit::code_for_manager_error(&error);
                    eprintln!("apply failed: {error}");
                    Ok(code)
                }
            }
        }
        Command::Dedupe { session } => {
            let token = CancellationToken::new();
            let removed = manager
                .apply_dedupe(session, &config.backup_dir, &token)
                .context("dedupe failed")?;
            output::emit(&removed, || format!("removed {removed} duplicate tool-reply blocks"), cli.json);
            Ok(SUCCESS)
        }
        Command::Undo { session } => {
            let token = CancellationToken::new();
            match manager.undo(session, &token) {
                Ok(applied) => {
                    output::emit(&applied, || output::applied_repair_text(&applied), cli.json);
                    Ok(SUCCESS)
                }
                Err(error) => {
                    let code = exit::code_for_manager_error(&error);
                    eprintln!("undo failed: {error}");
                    Ok(code)
                }
            }
        }
        Command::History { session } => {
            let history = manager.history(session);
            output::emit(&history, || output::history_text(&history), cli.json);
            Ok(SUCCESS)
        }
        Command::VerifyIntegrity { session } => {
            let outcome = manager.verify_integrity(session).context("verify_integrity failed")?;
            let ok = outcome.is_ok();
            output::emit(
                &outcome,
                || {
                    format!(
                        "checked {} events, {} digest mismatches, drift_detected={}",
                        outcome.checked_events,
                        outcome.digest_mismatches.len(),
                        outcome.drift_detected,
                    )
                },
                cli.json,
            );
            Ok(if ok { SUCCESS } else { exit::INTEGRITY_FAILURE })
        }
        Command::CurrentView { session } => {
            let dag = manager.current_view(session).context("current_view failed")?;
            output::emit(&output::DagView::from(&dag), || output::dag_text(&dag), cli.json);
            Ok(SUCCESS)
        }
    }
}
