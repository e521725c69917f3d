//! Display utilities for the btlock CLI.
//!
//! This module provides formatted output for:
//! - Poll events while the agent runs
//! - One-shot verdicts
//! - Certificate and settings summaries
//! - Error messages with suggestions

use std::path::Path;

use crate::agent::{PollEvent, StopReason};
use crate::error::AgentError;
use crate::settings::AgentSettings;
use crate::trust::TrustAnchor;
use crate::types::Verdict;

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows one poll event.
    pub fn show_event(event: &PollEvent) {
        println!("{}", Self::format_event(event));
    }

    /// Shows the verdict of a one-shot check.
    pub fn show_verdict(verdict: &Verdict) {
        println!("{}", Self::format_verdict(verdict));
        if let Verdict::Indeterminate(e) = verdict {
            println!("  ヒント: {}", e.suggestion());
        }
    }

    /// Shows a loaded certificate.
    pub fn show_certificate(path: &Path, anchor: &TrustAnchor) {
        println!("デーモン証明書");
        println!("─────────────────────────────");
        println!("ファイル: {}", path.display());
        println!("サブジェクト: {}", anchor.subject());
        println!("SHA-256: {}", anchor.fingerprint());
    }

    /// Shows the saved settings.
    pub fn show_settings(path: &Path, settings: &AgentSettings) {
        println!("* 設定を保存しました: {}", path.display());
        println!("  デーモン: {}", settings.endpoint());
        if let Some(pinned) = &settings.pinned_host {
            println!("  ピン留めホスト: {}", pinned);
        }
        println!(
            "  セキュリティレベル: {} ({})",
            settings.security_level,
            settings.security_level.description()
        );
        println!("  ポーリング間隔: {}秒", settings.poll_interval_seconds);
        println!("  タイムアウト: {}秒", settings.io_timeout_seconds);
        match &settings.cert_path {
            Some(cert) => println!("  証明書: {}", cert.display()),
            None => println!("  証明書: (未設定)"),
        }
        println!(
            "  起動時に有効化: {}",
            if settings.start_silently { "はい" } else { "いいえ" }
        );
    }

    /// Shows that the agent is waiting for activation.
    pub fn show_idle() {
        println!("エージェントは待機中です");
        #[cfg(unix)]
        println!("  SIGUSR1 で有効化/無効化を切り替えます (Ctrl-C で終了)");
        #[cfg(not(unix))]
        println!("  Ctrl-C で終了します");
    }

    /// Shows an error message followed by the suggestion for `error`.
    pub fn show_agent_error(message: &str, error: &AgentError) {
        Self::show_error(message);
        eprintln!("  ヒント: {}", error.suggestion());
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    /// Formats one poll event as a single line.
    pub fn format_event(event: &PollEvent) -> String {
        match event {
            PollEvent::Activated { url } => format!("* ポーリングを開始しました: {}", url),
            PollEvent::CycleCompleted { cycle, verdict } => {
                format!("[#{}] {}", cycle, Self::format_verdict(verdict))
            }
            PollEvent::LockTriggered => "!! ワークステーションをロックしました".to_string(),
            PollEvent::LockFailed { error } => format!("!! ロックに失敗しました: {}", error),
            PollEvent::Deactivated { reason } => match reason {
                StopReason::Requested => "[] ポーリングを停止しました".to_string(),
                StopReason::Denied => {
                    "[] 在席が確認できないためポーリングを停止しました".to_string()
                }
                StopReason::Failed(e) => {
                    format!("[] 問い合わせに失敗したためポーリングを停止しました: {}", e)
                }
            },
        }
    }

    /// Formats a verdict.
    pub fn format_verdict(verdict: &Verdict) -> String {
        match verdict {
            Verdict::Authorized => "認証OK: 在席を確認しました".to_string(),
            Verdict::Denied => "認証NG: デーモンが在席を否認しました".to_string(),
            Verdict::Indeterminate(e) if e.is_security_incident() => {
                format!("警告: デーモン証明書の検証に失敗しました ({})", e)
            }
            Verdict::Indeterminate(e) => format!("判定不能: {}", e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
