//! Operator interaction: per-bucket keep/remove questions and the final
//! confirmation before anything is moved.

use anyhow::Context;
use std::io::{BufRead, Write};
use sweeper_core::error::ReviewError;
use sweeper_core::models::Importance;
use sweeper_core::review::{parse_levels, BucketKey, Removal, ReviewSession, Selection};
use tracing::warn;

const UNKNOWN_REASONS_SHOWN: usize = 5;

enum Answer {
    Yes,
    No,
    Eof,
}

fn ask<R: BufRead, W: Write>(
    question: &str,
    default_yes: bool,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<Answer> {
    let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
    loop {
        write!(output, "{question} {hint} ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line).context("failed to read answer")? == 0 {
            writeln!(output)?;
            return Ok(Answer::Eof);
        }
        match line.trim().to_lowercase().as_str() {
            "" if default_yes => return Ok(Answer::Yes),
            "" => return Ok(Answer::No),
            "y" | "yes" => return Ok(Answer::Yes),
            "n" | "no" => return Ok(Answer::No),
            _ => writeln!(output, "Please answer y or n.")?,
        }
    }
}

/// Which levels of a mixed-level bucket to remove. Blank, `all` or end of
/// input removes the whole bucket.
fn ask_levels<R: BufRead, W: Write>(
    levels: &[&str],
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<Selection> {
    loop {
        write!(output, "Levels to remove ({}) [all] ", levels.join(","))?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line).context("failed to read answer")? == 0 {
            writeln!(output)?;
            return Ok(Selection::RemoveAll);
        }
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case("all") {
            return Ok(Selection::RemoveAll);
        }
        match parse_levels(line) {
            Some(chosen) => return Ok(Selection::RemoveLevels(chosen)),
            None => writeln!(output, "Please list levels such as low,medium.")?,
        }
    }
}

/// Asks about every bucket in summary order. Returns how many buckets were
/// marked for removal. End of input keeps everything not yet answered.
pub fn collect_decisions<R: BufRead, W: Write>(
    session: &mut ReviewSession,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<usize> {
    let keys: Vec<BucketKey> = session.summary().iter().map(|b| b.key.clone()).collect();
    let mut removed = 0;
    for key in keys {
        let mut levels = Vec::new();
        if let Some(bucket) = session.bucket(&key) {
            levels = bucket.levels.keys().map(|l| l.as_str()).collect();
            writeln!(
                output,
                "\n{} [{}]: {} files, {:.2} MB",
                key.program,
                key.importance,
                bucket.count(),
                bucket.total_mb()
            )?;
            if !bucket.levels.is_empty() {
                let counts: Vec<String> = bucket
                    .levels
                    .iter()
                    .map(|(level, n)| format!("{level}: {n}"))
                    .collect();
                writeln!(output, "  levels: {}", counts.join(", "))?;
            }
            if key.importance == Importance::Unknown {
                writeln!(output, "  could not be classified:")?;
                for verdict in bucket.verdicts.iter().take(UNKNOWN_REASONS_SHOWN) {
                    writeln!(
                        output,
                        "    {} ({})",
                        verdict.record.path.display(),
                        verdict.rationale
                    )?;
                }
            }
        }
        match ask("Keep these files?", true, input, output)? {
            Answer::Yes => session.decide(&key, true)?,
            Answer::No => {
                let selection = if levels.len() > 1 {
                    ask_levels(&levels, input, output)?
                } else {
                    Selection::RemoveAll
                };
                session.select(&key, selection)?;
                removed += 1;
            }
            Answer::Eof => {
                writeln!(output, "No more input; keeping the remaining buckets.")?;
                break;
            }
        }
    }
    Ok(removed)
}

/// Marks each `PROGRAM:LABEL[:LEVEL,...]` bucket for removal. Malformed
/// keys are an error; keys with no matching bucket are skipped with a
/// warning.
pub fn apply_removals(
    session: &mut ReviewSession,
    keys: &[String],
) -> anyhow::Result<Vec<BucketKey>> {
    let mut applied = Vec::new();
    for raw in keys {
        let removal: Removal = raw.parse()?;
        match session.apply(&removal) {
            Ok(()) => applied.push(removal.key),
            Err(ReviewError::UnknownBucket { .. }) => {
                warn!(bucket = %removal.key, "no files in bucket, nothing to remove");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(applied)
}

/// Defaults to no.
pub fn confirm<R: BufRead, W: Write>(
    question: &str,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<bool> {
    Ok(matches!(ask(question, false, input, output)?, Answer::Yes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use sweeper_core::filter::ProtectedPaths;
    use sweeper_core::models::{FileRecord, Level, Verdict};

    fn verdict(path: &str, program: &str, size: u64, importance: Importance) -> Verdict {
        Verdict {
            record: Arc::new(FileRecord {
                path: PathBuf::from(path),
                size,
                program: program.into(),
                accessed: None,
                modified: None,
                category: None,
            }),
            importance,
            level: None,
            rationale: "timed out".into(),
            latency: Duration::ZERO,
            attempts: 1,
        }
    }

    fn session() -> ReviewSession {
        ReviewSession::new(
            vec![
                verdict("/c/big/a", "big", 3000, Importance::NonImportant),
                verdict("/c/mid/a", "mid", 2000, Importance::NonImportant),
                verdict("/c/odd/a", "odd", 10, Importance::Unknown),
            ],
            &ProtectedPaths::default(),
        )
    }

    #[test]
    fn answers_map_to_decisions_in_summary_order() {
        let mut session = session();
        let mut input = Cursor::new("n\nmaybe\ny\n\n");
        let mut output = Vec::new();
        let removed = collect_decisions(&mut session, &mut input, &mut output).unwrap();
        assert_eq!(removed, 1);

        let paths: Vec<_> = session
            .resolved_deletion_set()
            .iter()
            .map(|r| r.path.clone())
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/c/big/a")]);

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Please answer y or n."));
        assert!(text.contains("/c/odd/a (timed out)"));
        assert!(text.find("big [").unwrap() < text.find("mid [").unwrap());
    }

    #[test]
    fn end_of_input_keeps_the_rest() {
        let mut session = session();
        let mut input = Cursor::new("n\n");
        let mut output = Vec::new();
        collect_decisions(&mut session, &mut input, &mut output).unwrap();
        assert_eq!(session.resolved_deletion_set().len(), 1);
        assert!(session.keeps(&BucketKey::new("mid", Importance::NonImportant)));
    }

    #[test]
    fn scripted_removals() {
        let mut session = session();
        let applied = apply_removals(
            &mut session,
            &["mid:non-important".to_string(), "ghost:unknown".to_string()],
        )
        .unwrap();
        assert_eq!(applied, vec![BucketKey::new("mid", Importance::NonImportant)]);
        assert_eq!(session.resolved_deletion_set().len(), 1);

        assert!(apply_removals(&mut session, &["no-label".to_string()]).is_err());
    }

    fn with_level(path: &str, level: Level) -> Verdict {
        let mut v = verdict(path, "editor", 100, Importance::NonImportant);
        v.level = Some(level);
        v
    }

    fn mixed_session() -> ReviewSession {
        ReviewSession::new(
            vec![
                with_level("/c/editor/a.log", Level::Low),
                with_level("/c/editor/b.log", Level::Medium),
                with_level("/c/editor/c.db", Level::High),
            ],
            &ProtectedPaths::default(),
        )
    }

    #[test]
    fn mixed_buckets_ask_which_levels_to_remove() {
        let mut session = mixed_session();
        let mut input = Cursor::new("n\nlots\nlow, medium\n");
        let mut output = Vec::new();
        let removed = collect_decisions(&mut session, &mut input, &mut output).unwrap();
        assert_eq!(removed, 1);

        let paths: Vec<_> = session
            .resolved_deletion_set()
            .iter()
            .map(|r| r.path.clone())
            .collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/c/editor/a.log"), PathBuf::from("/c/editor/b.log")]
        );
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("levels: low: 1, medium: 1, high: 1"));
        assert!(text.contains("Levels to remove (low,medium,high) [all]"));
        assert!(text.contains("Please list levels such as low,medium."));
    }

    #[test]
    fn blank_level_answer_removes_the_bucket() {
        let mut session = mixed_session();
        let mut input = Cursor::new("n\n\n");
        collect_decisions(&mut session, &mut input, &mut Vec::new()).unwrap();
        assert_eq!(session.resolved_deletion_set().len(), 3);
    }

    #[test]
    fn scripted_removals_can_name_levels() {
        let mut session = mixed_session();
        let applied =
            apply_removals(&mut session, &["editor:non-important:high".to_string()]).unwrap();
        assert_eq!(applied, vec![BucketKey::new("editor", Importance::NonImportant)]);
        let removed = session.resolved_deletion_set();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path, PathBuf::from("/c/editor/c.db"));

        assert!(apply_removals(&mut session, &["editor:non-important:loud".to_string()]).is_err());
    }

    #[test]
    fn confirmation_defaults_to_no() {
        let mut output = Vec::new();
        assert!(!confirm("Proceed?", &mut Cursor::new("\n"), &mut output).unwrap());
        assert!(confirm("Proceed?", &mut Cursor::new("yes\n"), &mut output).unwrap());
        assert!(!confirm("Proceed?", &mut Cursor::new(""), &mut output).unwrap());
    }
}
