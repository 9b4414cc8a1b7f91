//! Display lines for the side contexts, with busy indicators overlaid.

use crate::{
    context::ContextKey,
    model::{Branch, Commit, File, HasUrn, Model, RepoStatus},
    operations::{ItemOperation, OperationRegistry},
};

/// Append the item's in-flight operation, if any, after `text`.
fn with_operation(
    text: String,
    item: &dyn HasUrn,
    registry: &OperationRegistry,
    spinner: &str,
) -> String {
    match registry.get(item) {
        ItemOperation::None => text,
        op => format!("{} {} {}", text, op.label(), spinner),
    }
}

fn file_line(file: &File) -> String {
    match &file.previous_path {
        Some(prev) => format!("{} {} → {}", file.short_status, prev, file.path),
        None => format!("{} {}", file.short_status, file.path),
    }
}

fn branch_line(branch: &Branch) -> String {
    let head = if branch.is_head { "* " } else { "  " };
    let mut line = format!("{}{}", head, branch.name);
    if branch.upstream_gone {
        line.push_str(" (upstream gone)");
    } else if let (Some(ahead), Some(behind)) = (branch.ahead, branch.behind) {
        if ahead > 0 {
            line.push_str(&format!(" ↑{}", ahead));
        }
        if behind > 0 {
            line.push_str(&format!(" ↓{}", behind));
        }
        if ahead == 0 && behind == 0 {
            line.push_str(" ✓");
        }
    }
    line
}

fn commit_line(commit: &Commit) -> String {
    format!("{} {}", commit.short_hash(), commit.subject)
}

fn status_line(status: &RepoStatus) -> String {
    let mut line = format!("{} → {}", status.repo_name, status.branch);
    if status.ahead > 0 || status.behind > 0 {
        line.push_str(&format!(" ↑{} ↓{}", status.ahead, status.behind));
    }
    if let Some(state) = status.working_tree_state.label() {
        line.push_str(&format!(" ({})", state));
    }
    line
}

fn lines_for<T: HasUrn>(
    items: &[T],
    render: impl Fn(&T) -> String,
    registry: &OperationRegistry,
    spinner: &str,
) -> Vec<String> {
    items
        .iter()
        .map(|item| with_operation(render(item), item, registry, spinner))
        .collect()
}

/// Lines for a side context, or `None` for contexts whose content is not a
/// list of model entities.
///
/// Each domain's fields are copied inside its own critical section.
pub fn context_lines(
    model: &Model,
    key: ContextKey,
    registry: &OperationRegistry,
    spinner: &str,
) -> Option<Vec<String>> {
    let lines = match key {
        ContextKey::Status => vec![status_line(&model.status_snapshot())],
        ContextKey::Files => lines_for(&model.files_snapshot(), file_line, registry, spinner),
        ContextKey::Submodules => {
            let submodules = model.files.lock().submodules.clone();
            lines_for(&submodules, |s| format!("{} {}", s.name, s.path), registry, spinner)
        }
        ContextKey::LocalBranches => {
            lines_for(&model.branches_snapshot(), branch_line, registry, spinner)
        }
        ContextKey::Remotes => {
            let remotes = model.branches.lock().remotes.clone();
            lines_for(
                &remotes,
                |r| format!("{} ({} branches)", r.name, r.branches.len()),
                registry,
                spinner,
            )
        }
        ContextKey::Tags => {
            let tags = model.branches.lock().tags.clone();
            lines_for(
                &tags,
                |t| {
                    if t.message.is_empty() {
                        t.name.clone()
                    } else {
                        format!("{} {}", t.name, t.message)
                    }
                },
                registry,
                spinner,
            )
        }
        ContextKey::Worktrees => {
            let worktrees = model.branches.lock().worktrees.clone();
            lines_for(
                &worktrees,
                |w| {
                    let marker = if w.is_current { "* " } else { "  " };
                    let name = w.branch.as_deref().unwrap_or("(detached)");
                    format!("{}{} {}", marker, name, w.path)
                },
                registry,
                spinner,
            )
        }
        ContextKey::LocalCommits => {
            lines_for(&model.commits_snapshot(), commit_line, registry, spinner)
        }
        ContextKey::ReflogCommits => {
            let (_, filtered) = model.reflog_snapshot();
            lines_for(filtered.as_slice(), commit_line, registry, spinner)
        }
        ContextKey::SubCommits => {
            let commits = model.sub_commits.lock().commits.clone();
            lines_for(&commits, commit_line, registry, spinner)
        }
        ContextKey::Stash => {
            let stash = model.local_commits.lock().stash_entries.clone();
            lines_for(
                &stash,
                |s| format!("{} {}", s.ref_name(), s.name),
                registry,
                spinner,
            )
        }
        ContextKey::Main
        | ContextKey::Secondary
        | ContextKey::Confirmation
        | ContextKey::Prompt
        | ContextKey::Suggestions
        | ContextKey::Menu => return None,
    };
    Some(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str, is_head: bool, ahead: u32, behind: u32) -> Branch {
        Branch {
            name: name.to_string(),
            is_head,
            upstream: Some(format!("origin/{}", name)),
            ahead: Some(ahead),
            behind: Some(behind),
            upstream_gone: false,
        }
    }

    #[test]
    fn operations_are_overlaid_on_their_item_only() {
        let model = Model::new();
        model.branches.lock().branches = vec![branch("main", true, 1, 0), branch("dev", false, 0, 0)];
        let registry = OperationRegistry::new();
        registry.set(&branch("main", true, 1, 0), ItemOperation::Pushing);

        let lines = context_lines(&model, ContextKey::LocalBranches, &registry, "⠋").unwrap();
        assert_eq!(lines, vec!["* main ↑1 Pushing ⠋", "  dev ✓"]);
    }

    #[test]
    fn files_show_status_and_renames() {
        let model = Model::new();
        model.replace_files(vec![
            File::from_status('M', ' ', "src/lib.rs".into(), None),
            File::from_status('R', ' ', "new.rs".into(), Some("old.rs".into())),
        ]);
        let lines = context_lines(&model, ContextKey::Files, &OperationRegistry::new(), "").unwrap();
        assert_eq!(lines, vec!["M  src/lib.rs", "R  old.rs → new.rs"]);
    }

    #[test]
    fn non_list_contexts_have_no_lines() {
        let model = Model::new();
        let registry = OperationRegistry::new();
        assert!(context_lines(&model, ContextKey::Main, &registry, "").is_none());
        assert!(context_lines(&model, ContextKey::Menu, &registry, "").is_none());
    }
}
