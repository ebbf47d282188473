//! The idempotent setup script that converges a sandbox onto a worktree.
//!
//! The whole procedure is one `sh -c` invocation so it can run safely on
//! every agent step: clone if the bare repository is missing, fetch if not,
//! create the worktree if absent, fetch-and-reset it if present. Progress
//! goes to stderr; the only stdout line is the resulting worktree path.

use super::GitContext;

/// Directory under the sandbox root holding one worktree per ref.
const WORKTREES_DIR: &str = "worktrees";

/// Percent-encodes a ref into a directory name and checks out `rg`, written
/// as plain POSIX sh so it runs in minimal sandbox images.
const SCRIPT_PRELUDE: &str = r#"set -e

rg_pid=""
if ! command -v rg >/dev/null 2>&1; then
    (apt-get update -qq >/dev/null 2>&1 && apt-get install -qq -y ripgrep >/dev/null 2>&1 || true) &
    rg_pid=$!
fi

urlencode() {
    in="$1"
    out=""
    while [ -n "$in" ]; do
        rest="${in#?}"
        c="${in%"$rest"}"
        in="$rest"
        case "$c" in
            [A-Za-z0-9._~-]) out="$out$c" ;;
            *) out="$out$(printf '%%%02X' "'$c")" ;;
        esac
    done
    printf '%s' "$out"
}
"#;

const SCRIPT_BODY: &str = r#"
if [ ! -d "$bare_dir" ]; then
    git clone --bare "$repo_url" "$bare_dir" >&2
    git --git-dir="$bare_dir" config remote.origin.fetch '+refs/heads/*:refs/remotes/origin/*'
fi
git --git-dir="$bare_dir" fetch origin --prune >&2 || true

if [ -z "$ref" ]; then
    ref="$(git --git-dir="$bare_dir" symbolic-ref --short HEAD 2>/dev/null || true)"
fi
if [ -z "$ref" ]; then
    echo 'could not determine default branch' >&2
    exit 1
fi

wt_dir="$worktrees_dir/$(urlencode "$ref")"
if [ ! -d "$wt_dir" ]; then
    mkdir -p "$worktrees_dir"
    git --git-dir="$bare_dir" worktree add "$wt_dir" "$ref" >/dev/null 2>&1 \
        || git --git-dir="$bare_dir" worktree add -b "$ref" "$wt_dir" "origin/$ref" >&2
else
    (
        cd "$wt_dir"
        git fetch origin >&2 || true
        git reset --hard "origin/$ref" >/dev/null 2>&1 || git reset --hard "$ref" >&2
    )
fi

if [ -n "$rg_pid" ]; then
    wait "$rg_pid" >/dev/null 2>&1 || true
fi

printf '%s/%s\n' "$PWD" "$wt_dir"
"#;

/// HTTPS clone URL for the repository under `remote_base`
/// (e.g. `https://github.com`, or a local path base in tests).
pub fn clone_url(remote_base: &str, ctx: &GitContext) -> String {
    format!(
        "{}/{}/{}.git",
        remote_base.trim_end_matches('/'),
        ctx.owner,
        ctx.repo
    )
}

/// Builds the full setup script for one repository context.
pub fn setup_script(remote_base: &str, ctx: &GitContext) -> String {
    let mut script = String::from(SCRIPT_PRELUDE);
    script.push_str(&format!(
        "\nrepo_url={}\nbare_dir={}\nworktrees_dir={}\nref={}\n",
        sh_quote(&clone_url(remote_base, ctx)),
        sh_quote(&format!("{}.git", ctx.repo)),
        sh_quote(WORKTREES_DIR),
        sh_quote(ctx.ref_name.as_deref().unwrap_or("")),
    ));
    script.push_str(SCRIPT_BODY);
    script
}

/// Extracts the worktree path from the script's stdout: the last non-empty
/// line, with a leading relative-parent marker stripped. `None` when the
/// script printed nothing usable.
pub fn parse_worktree_path(stdout: &str) -> Option<String> {
    let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
    let line = line.trim();
    let stripped = line.strip_prefix("../").unwrap_or(line);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Single-quotes a string for safe interpolation into sh source.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
