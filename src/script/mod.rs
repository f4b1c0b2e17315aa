//! Batch script rendering and log-path token handling
//!
//! The generated script is a POSIX shell script with a login-shell shebang
//! (so the user's shell initialization runs on the compute node), one
//! `#SBATCH` directive line per scheduler argument, diagnostic echoes, the
//! job's pre-run commands, the execution command, and a final sentinel line
//! that marks the end of the job's output in the log file.
//!
//! Script generation is pure text; the caller persists the script before
//! submission.

use regex_lite::Regex;

use crate::job::JobMetadata;

/// Marker token that prefixes every scheduler directive line.
pub const DIRECTIVE_PREFIX: &str = "#SBATCH";

/// Sentinel written as the last line of a job's log output.
///
/// Log following terminates when this exact line appears. If the job is
/// killed before reaching it, the follower keeps retrying until detached.
pub const LOG_EOF_SENTINEL: &str = "=== remoteexec: end of job output ===";

/// Ordered set of scheduler directives (flag name to value).
///
/// Insertion order is preserved; setting an existing flag replaces its
/// value in place.
#[derive(Debug, Clone, Default)]
pub struct DirectiveSet {
    entries: Vec<(String, String)>,
}

impl DirectiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag, replacing any existing value for the same flag.
    pub fn set(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        let flag = flag.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.0 == flag) {
            entry.1 = value;
        } else {
            self.entries.push((flag, value));
        }
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.0 == flag)
            .map(|entry| entry.1.as_str())
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.get(flag).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(flag, value)| (flag.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the directives describe an array task (`--array` or `-a`).
    pub fn is_array_task(&self) -> bool {
        self.contains("--array") || self.contains("-a")
    }

    /// Render the directive block, one line per flag.
    ///
    /// Long flags use `--flag=value` syntax, short flags `-f value`.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(flag, value)| {
                if flag.starts_with("--") {
                    format!("{} {}={}", DIRECTIVE_PREFIX, flag, value)
                } else {
                    format!("{} {} {}", DIRECTIVE_PREFIX, flag, value)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Render the batch submission script for a job.
///
/// `exec_command` is the shell command that re-invokes the job on the
/// compute node; it is included verbatim, so the caller quotes it.
pub fn build_script(meta: &JobMetadata, directives: &DirectiveSet, exec_command: &str) -> String {
    let pre_run = meta.pre_run_commands.join("\n");

    format!(
        r##"#!/bin/bash -l
# The -l flag runs this script as a login shell so that ~/.bashrc and any
# environment setup (conda, modules) are applied on the compute node.
#
# Generated by remoteexec.
#
{directives}

echo "# Job name: $SLURM_JOB_NAME"
echo "# Node: $SLURM_JOB_NODELIST"
echo "# Cluster: $SLURM_CLUSTER_NAME"
echo "# Job id: $SLURM_JOB_ID"
echo "# Array parent job id: $SLURM_ARRAY_JOB_ID"
echo "# Array task id: $SLURM_ARRAY_TASK_ID"
echo "# Start time: $(date)"
echo

{pre_run}

echo "# > {exec_command}"
echo

{exec_command}

echo
echo "{sentinel}"
"##,
        directives = directives.render(),
        pre_run = pre_run,
        exec_command = exec_command,
        sentinel = LOG_EOF_SENTINEL,
    )
}

/// Substitute scheduler tokens in a log-path template.
///
/// `%x` becomes the job name, `%A` and `%j` the job id. `%a` (array task
/// id) is resolved by the scheduler per sub-job and is left untouched, so
/// array templates still contain it afterwards. Without a job name `%x`
/// is likewise left in place, so the unresolved-token check rejects the
/// path instead of silently pointing at an empty-named file.
///
/// These are the same substitutions the generated script's `--output`
/// directive undergoes on the scheduler side; both must agree or the
/// follower would tail the wrong file.
pub fn resolve_log_path(template: &str, job_name: Option<&str>, job_id: &str) -> String {
    let with_name = match job_name {
        Some(name) => template.replace("%x", name),
        None => template.to_string(),
    };
    with_name.replace("%A", job_id).replace("%j", job_id)
}

/// Whether a resolved log path still contains scheduler tokens.
///
/// A path with leftover tokens does not name a real file and must not be
/// followed.
pub fn has_unresolved_tokens(path: &str) -> bool {
    let pattern = Regex::new(r"%[A-Za-z]").expect("token pattern is valid");
    pattern.is_match(path)
}

/// Quote a string for safe interpolation into a POSIX shell command line.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> JobMetadata {
        JobMetadata::new("train")
            .with_pre_run_command("module load cuda")
            .with_pre_run_command("conda activate research")
    }

    fn directives() -> DirectiveSet {
        let mut d = DirectiveSet::new();
        d.set("--job-name", "train");
        d.set("--time", "01:00:00");
        d.set("-p", "gpu");
        d
    }

    #[test]
    fn test_directive_rendering_long_and_short() {
        let rendered = directives().render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "#SBATCH --job-name=train");
        assert_eq!(lines[1], "#SBATCH --time=01:00:00");
        assert_eq!(lines[2], "#SBATCH -p gpu");
    }

    #[test]
    fn test_directive_set_replaces_in_place() {
        let mut d = directives();
        d.set("--time", "02:00:00");
        assert_eq!(d.get("--time"), Some("02:00:00"));
        assert_eq!(d.len(), 3);
        // Order is unchanged after replacement.
        let flags: Vec<&str> = d.iter().map(|(flag, _)| flag).collect();
        assert_eq!(flags, vec!["--job-name", "--time", "-p"]);
    }

    #[test]
    fn test_array_detection() {
        let mut d = directives();
        assert!(!d.is_array_task());
        d.set("--array", "0-9");
        assert!(d.is_array_task());

        let mut short = DirectiveSet::new();
        short.set("-a", "0-3");
        assert!(short.is_array_task());
    }

    #[test]
    fn test_script_contains_pre_run_commands_verbatim_in_order() {
        let script = build_script(&meta(), &directives(), "./train --epochs 10");

        let first = script.find("module load cuda").expect("first pre-run command");
        let second = script
            .find("conda activate research")
            .expect("second pre-run command");
        assert!(first < second);
    }

    #[test]
    fn test_script_shape() {
        let script = build_script(&meta(), &directives(), "./train");

        assert!(script.starts_with("#!/bin/bash -l\n"));
        assert!(script.contains("#SBATCH --job-name=train"));
        assert!(script.contains("echo \"# > ./train\""));
        assert!(script.trim_end().ends_with(&format!("echo \"{}\"", LOG_EOF_SENTINEL)));
    }

    #[test]
    fn test_resolve_log_path_array_template() {
        let resolved = resolve_log_path("%A_%a.out", Some("train"), "12345");
        assert_eq!(resolved, "12345_%a.out");
        assert!(has_unresolved_tokens(&resolved));
    }

    #[test]
    fn test_resolve_log_path_simple_template() {
        let resolved = resolve_log_path("/home/u/slurm_logs/%j.out", Some("train"), "12345");
        assert_eq!(resolved, "/home/u/slurm_logs/12345.out");
        assert!(!has_unresolved_tokens(&resolved));
    }

    #[test]
    fn test_resolve_log_path_job_name_token() {
        let resolved = resolve_log_path("%x/%j.out", Some("train"), "7");
        assert_eq!(resolved, "train/7.out");
    }

    #[test]
    fn test_resolve_log_path_without_job_name_keeps_token() {
        let resolved = resolve_log_path("%x/%j.out", None, "7");
        assert_eq!(resolved, "%x/7.out");
        assert!(has_unresolved_tokens(&resolved));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-arg_1.txt"), "plain-arg_1.txt");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
