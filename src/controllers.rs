//! User actions behind the demonstration keymap.
//!
//! Actions only borrow the [`Gui`] long enough to read the selection and clone
//! the handles they need. Everything slow runs on a worker under an inline or
//! waiting status.

use std::env;

use crate::{
    context::ContextKey,
    error::{CommandError, GuiError},
    git_commands::{Credentials, GitCommands, needs_credentials},
    gui::Gui,
    inline_status::InlineStatus,
    model::{Branch, File},
    operations::ItemOperation,
    popup::{ConfirmOpts, DisabledReason, MenuItem, MenuOpts, MenuWidget, Popups, PromptOpts},
    refresh::{RefreshOptions, RefreshScope, Refresher},
    screen::ScreenMode,
    suggestions::{branch_suggestions, file_suggestions, history_suggestions},
    view_buffer::CommandSpec,
};

/// The handles a repository action needs after it leaves the UI thread.
#[derive(Clone)]
struct Ops {
    git: GitCommands,
    refresher: Refresher<Gui>,
    inline: InlineStatus<Gui>,
    popups: Popups<Gui>,
}

impl Ops {
    fn new(gui: &Gui) -> Self {
        Self {
            git: gui.git().clone(),
            refresher: gui.refresher().clone(),
            inline: gui.inline().clone(),
            popups: gui.popups().clone(),
        }
    }
}

/// Ask for the username and password git wanted, then `retry` with them.
fn ask_credentials<F>(ops: &Ops, retry: F) -> anyhow::Result<()>
where
    F: FnOnce(Ops) + Send + 'static,
{
    let ops = ops.clone();
    let popups = ops.popups.clone();
    popups.prompt(
        PromptOpts::new("Username", move |username: String| {
            let next = ops.popups.clone();
            next.prompt(
                PromptOpts::new("Password", move |password: String| {
                    let mut ops = ops;
                    ops.git = ops.git.with_credentials(Credentials { username, password });
                    retry(ops);
                    Ok(())
                })
                .mask(),
            )
        })
        .validate(|input| {
            if input.trim().is_empty() {
                return Err(GuiError::UserInput("Username cannot be empty".into()).into());
            }
            Ok(())
        }),
    )
}

fn disabled(text: &str) -> anyhow::Error {
    GuiError::Disabled {
        text: text.to_string(),
        show_in_panel: false,
    }
    .into()
}

/// Git's list of files a checkout would clobber is too long for a toast.
fn checkout_error(err: CommandError) -> anyhow::Error {
    match err {
        CommandError::Failed { stderr, .. }
            if stderr.contains("would be overwritten by checkout") =>
        {
            GuiError::ShowInPanel(stderr).into()
        }
        other => other.into(),
    }
}

fn selected_branch(gui: &Gui) -> Option<Branch> {
    let selected = gui.contexts().selected(ContextKey::LocalBranches);
    gui.model().branches_snapshot().into_iter().nth(selected)
}

fn selected_file(gui: &Gui) -> Option<File> {
    let selected = gui.contexts().selected(ContextKey::Files);
    gui.model().files_snapshot().into_iter().nth(selected)
}

/// Push the checked-out branch. A diverged branch needs confirmation to force.
pub fn push(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(branch) = gui.model().checked_out_branch() else {
        return Err(disabled("No branch is checked out"));
    };
    gui.log().log_action("Push");
    let ops = Ops::new(gui);

    if branch.upstream.is_none() {
        let remotes: Vec<String> = gui
            .model()
            .branches
            .lock()
            .remotes
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let prompt = PromptOpts::new("Push to remote", move |remote: String| {
            let remote = remote.trim().to_string();
            start_push(&ops, branch, Some(remote), false);
            Ok(())
        })
        .initial("origin")
        .suggestions(history_suggestions(remotes))
        .validate(|input| {
            if input.trim().is_empty() || input.contains(char::is_whitespace) {
                return Err(GuiError::UserInput("Enter a single remote name".into()).into());
            }
            Ok(())
        });
        return gui.popups().prompt(prompt);
    }

    let diverged = branch.behind.is_some_and(|n| n > 0);
    gui.popups().confirm_if(
        diverged,
        ConfirmOpts::new(
            "Force push",
            "Your branch has diverged from the remote branch. Force push with lease?",
            move || {
                start_push(&ops, branch, None, diverged);
                Ok(())
            },
        ),
    )
}

fn start_push(ops: &Ops, branch: Branch, set_upstream: Option<String>, force: bool) {
    let this = ops.clone();
    let item = branch.clone();
    ops.inline.with_inline_status(
        &item,
        ItemOperation::Pushing,
        ContextKey::LocalBranches,
        move |task| {
            let pushed =
                this.git
                    .push(&branch.name, set_upstream.as_deref(), force, task.cancel_token());
            match pushed {
                Err(e) if needs_credentials(&e) => {
                    return ask_credentials(&this, move |ops| {
                        start_push(&ops, branch, set_upstream, force)
                    });
                }
                result => result?,
            }
            this.refresher.refresh(RefreshOptions::new([
                RefreshScope::Branches,
                RefreshScope::Status,
            ]))
        },
    );
}

pub fn pull(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(branch) = gui.model().checked_out_branch() else {
        return Err(disabled("No branch is checked out"));
    };
    if branch.upstream.is_none() {
        return Err(disabled("The checked out branch has no upstream"));
    }
    gui.log().log_action("Pull");
    start_pull(&Ops::new(gui), branch);
    Ok(())
}

fn start_pull(ops: &Ops, branch: Branch) {
    let this = ops.clone();
    let item = branch.clone();
    ops.inline.with_inline_status(
        &item,
        ItemOperation::Pulling,
        ContextKey::LocalBranches,
        move |task| {
            match this.git.pull(false, task.cancel_token()) {
                Err(e) if needs_credentials(&e) => {
                    return ask_credentials(&this, move |ops| start_pull(&ops, branch));
                }
                result => result?,
            }
            this.refresher.refresh(RefreshOptions::all())
        },
    );
}

/// Fast-forward the selected branch from its upstream without checking it out.
/// On the checked-out branch this is a pull.
pub fn fast_forward(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(branch) = selected_branch(gui) else {
        return Ok(());
    };
    if branch.is_head {
        return pull(gui);
    }
    let Some((remote, remote_branch)) = branch
        .upstream
        .as_deref()
        .and_then(|u| u.split_once('/'))
        .map(|(r, b)| (r.to_string(), b.to_string()))
    else {
        return Err(disabled("This branch has no upstream"));
    };
    gui.log().log_action("Fast forward branch");
    let ops = Ops::new(gui);
    let git = ops.git.clone();
    let refresher = ops.refresher.clone();
    let name = branch.name.clone();
    ops.inline.with_inline_status(
        &branch,
        ItemOperation::FastForwarding,
        ContextKey::LocalBranches,
        move |task| {
            git.fast_forward(&name, &remote, &remote_branch, task.cancel_token())?;
            refresher.refresh(RefreshOptions::new([
                RefreshScope::Branches,
                RefreshScope::Reflog,
            ]))
        },
    );
    Ok(())
}

pub fn fetch(gui: &mut Gui) -> anyhow::Result<()> {
    gui.log().log_action("Fetch");
    let ops = Ops::new(gui);
    gui.with_waiting_status("Fetching", move |task| {
        ops.git.fetch(task.cancel_token())?;
        ops.refresher.refresh(RefreshOptions::new([
            RefreshScope::Branches,
            RefreshScope::Commits,
            RefreshScope::Remotes,
            RefreshScope::Status,
        ]))
    });
    Ok(())
}

/// Fetch the selected remote, showing the operation on it.
pub fn fetch_remote(gui: &mut Gui) -> anyhow::Result<()> {
    let selected = gui.contexts().selected(ContextKey::Remotes);
    let Some(remote) = gui.model().branches.lock().remotes.get(selected).cloned() else {
        return Ok(());
    };
    gui.log().log_action("Fetch remote");
    let ops = Ops::new(gui);
    let git = ops.git.clone();
    let refresher = ops.refresher.clone();
    let name = remote.name.clone();
    ops.inline.with_inline_status(
        &remote,
        ItemOperation::Fetching,
        ContextKey::Remotes,
        move |task| {
            git.fetch_remote(&name, task.cancel_token())?;
            refresher.refresh(RefreshOptions::new([
                RefreshScope::Remotes,
                RefreshScope::Branches,
            ]))
        },
    );
    Ok(())
}

pub fn checkout(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(branch) = selected_branch(gui) else {
        return Ok(());
    };
    if branch.is_head {
        return Ok(());
    }
    gui.log().log_action("Checkout branch");
    let ops = Ops::new(gui);
    let git = ops.git.clone();
    let refresher = ops.refresher.clone();
    let name = branch.name.clone();
    ops.inline.with_inline_status(
        &branch,
        ItemOperation::CheckingOut,
        ContextKey::LocalBranches,
        move |task| {
            git.checkout(&name, task.cancel_token())
                .map_err(checkout_error)?;
            refresher.refresh(RefreshOptions::all())
        },
    );
    Ok(())
}

/// Menu of delete options for the selected branch.
pub fn delete_branch(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(branch) = selected_branch(gui) else {
        return Ok(());
    };
    let ops = Ops::new(gui);
    let popups = gui.popups().clone();

    let mut local = {
        let ops = ops.clone();
        let branch = branch.clone();
        let popups = popups.clone();
        MenuItem::new("Delete local branch", move || {
            let prompt = format!("Are you sure you want to delete the branch '{}'?", branch.name);
            popups.confirm(ConfirmOpts::new("Delete branch", prompt, move || {
                start_delete(&ops, branch, false);
                Ok(())
            }))
        })
        .key('c')
        .opens_menu()
    };
    if branch.is_head {
        local = local.disabled(DisabledReason::new(
            "You cannot delete the checked out branch!",
        ));
    }

    let mut remote = {
        let ops = ops.clone();
        let branch = branch.clone();
        MenuItem::new("Delete remote branch", move || {
            let Some((remote, name)) = branch
                .upstream
                .as_deref()
                .and_then(|u| u.split_once('/'))
                .map(|(r, b)| (r.to_string(), b.to_string()))
            else {
                return Ok(());
            };
            let prompt = format!("Are you sure you want to delete '{}/{}'?", remote, name);
            popups.confirm(ConfirmOpts::new("Delete remote branch", prompt, move || {
                let git = ops.git.clone();
                let refresher = ops.refresher.clone();
                ops.inline.with_inline_status(
                    &branch,
                    ItemOperation::Deleting,
                    ContextKey::LocalBranches,
                    move |task| {
                        git.delete_remote_branch(&remote, &name, task.cancel_token())?;
                        refresher.refresh(RefreshOptions::new([
                            RefreshScope::Branches,
                            RefreshScope::Remotes,
                        ]))
                    },
                );
                Ok(())
            }))
        })
        .key('r')
        .opens_menu()
    };
    if branch.upstream.is_none() {
        remote = remote.disabled(DisabledReason::new("This branch has no upstream").in_panel());
    }

    gui.popups().menu(MenuOpts::new(
        format!("Delete branch '{}'?", branch.name),
        vec![local, remote],
    ))
}

fn start_delete(ops: &Ops, branch: Branch, force: bool) {
    let git = ops.git.clone();
    let refresher = ops.refresher.clone();
    let name = branch.name.clone();
    ops.inline.with_inline_status(
        &branch,
        ItemOperation::Deleting,
        ContextKey::LocalBranches,
        move |task| {
            git.delete_branch(&name, force, task.cancel_token())?;
            refresher.refresh(RefreshOptions::new([RefreshScope::Branches]))
        },
    );
}

/// Prompt for a new branch name, suggesting existing branches as the base.
pub fn new_branch(gui: &mut Gui) -> anyhow::Result<()> {
    let base = selected_branch(gui)
        .map(|b| b.name)
        .unwrap_or_else(|| "HEAD".to_string());
    let names = gui.model().branch_names();
    let ops = Ops::new(gui);
    let coord = gui.coord().clone();
    let title = format!("New branch name (branch is off of '{}')", base);
    gui.popups().prompt(
        PromptOpts::new(title, move |name: String| {
            let name = name.trim().replace(' ', "-");
            coord.on_ui_thread(move |gui: &mut Gui| {
                gui.log().log_action("Create branch");
                gui.with_waiting_status("Creating branch", move |task| {
                    ops.git.create_branch(&name, &base, task.cancel_token())?;
                    ops.refresher.refresh(RefreshOptions::all())
                });
                Ok(())
            });
            Ok(())
        })
        .suggestions(branch_suggestions(names))
        .allow_edit_suggestion()
        .validate(|input| {
            if input.trim().is_empty() {
                return Err(GuiError::UserInput("Branch name cannot be empty".into()).into());
            }
            Ok(())
        }),
    )
}

/// Stage or unstage the selected file.
pub fn toggle_staged(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(file) = selected_file(gui) else {
        return Ok(());
    };
    let ops = Ops::new(gui);
    let paths = vec![file.path.clone()];
    let unstage = file.has_staged_changes && !file.has_unstaged_changes;
    gui.log()
        .log_action(if unstage { "Unstage file" } else { "Stage file" });
    gui.coord().on_worker(move |task| {
        if unstage {
            ops.git.unstage_paths(&paths, task.cancel_token())?;
        } else {
            ops.git.stage_paths(&paths, task.cancel_token())?;
        }
        ops.refresher.refresh(RefreshOptions::new([RefreshScope::Files]))
    });
    Ok(())
}

/// Prompt for a .gitignore pattern, suggesting changed files.
pub fn ignore_file(gui: &mut Gui) -> anyhow::Result<()> {
    let ops = Ops::new(gui);
    let coord = gui.coord().clone();
    let popups = gui.popups().clone();
    gui.popups().prompt(
        PromptOpts::new("Add to .gitignore", move |pattern: String| {
            coord.on_ui_thread(move |gui: &mut Gui| {
                gui.log().log_action("Ignore file");
                gui.with_waiting_status("Updating .gitignore", move |_| {
                    let added = ops.git.add_to_gitignore(std::slice::from_ref(&pattern))?;
                    popups.toast(if added > 0 {
                        format!("Added '{pattern}' to .gitignore")
                    } else {
                        format!("'{pattern}' is already ignored")
                    });
                    ops.refresher.refresh(RefreshOptions::new([RefreshScope::Files]))
                });
                Ok(())
            });
            Ok(())
        })
        .suggestions(file_suggestions(gui.model())),
    )
}

/// Filter the reflog by the selected file, or clear the filter.
pub fn toggle_reflog_filter(gui: &mut Gui) -> anyhow::Result<()> {
    let refresher = gui.refresher().clone();
    let path = match refresher.filter_path() {
        Some(_) => None,
        None => match selected_file(gui) {
            Some(f) => Some(f.path),
            None => return Err(disabled("Select a file to filter by")),
        },
    };
    gui.log().log_action(if path.is_some() {
        "Filter reflog by path"
    } else {
        "Clear reflog filter"
    });
    refresher.set_filter_path(path);
    refresher.refresh(RefreshOptions::new([RefreshScope::Reflog]))
}

/// Prompt for a shell command, suggesting history. Suggestions are editable
/// and can be deleted from the history.
pub fn custom_command(gui: &mut Gui) -> anyhow::Result<()> {
    let history = gui.app_state().get().custom_command_history.clone();
    let coord = gui.coord().clone();
    let delete_coord = gui.coord().clone();
    let cwd = gui.git().repo_root().to_path_buf();
    gui.popups().prompt(
        PromptOpts::new("Custom command:", move |cmd: String| {
            coord.on_ui_thread(move |gui: &mut Gui| {
                gui.app_state_mut().get_mut().push_custom_command(&cmd);
                gui.save_app_state_and_log_error();
                gui.log().log_action("Custom command");
                let spec = CommandSpec::new(shell(), cwd).args(["-c", cmd.as_str()]);
                gui.run_subprocess(&spec)
            });
            Ok(())
        })
        .suggestions(history_suggestions(history))
        .allow_edit_suggestion()
        .on_delete_suggestion(move |suggestion| {
            let cmd = suggestion.value.clone();
            delete_coord.on_ui_thread(move |gui: &mut Gui| {
                gui.app_state_mut()
                    .get_mut()
                    .custom_command_history
                    .retain(|c| *c != cmd);
                gui.save_app_state_and_log_error();
                Ok(())
            });
            Ok(())
        }),
    )
}

/// Open the selected file in `$EDITOR`, handing it the terminal.
pub fn edit_file(gui: &mut Gui) -> anyhow::Result<()> {
    let Some(file) = selected_file(gui) else {
        return Ok(());
    };
    let editor = env::var("EDITOR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "vim".to_string());
    let spec = CommandSpec::new(editor, gui.git().repo_root().to_path_buf()).args([file.path]);
    gui.run_subprocess(&spec)
}

fn shell() -> String {
    env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

/// The options menu: view toggles and a few repository actions.
pub fn options_menu(gui: &mut Gui) -> anyhow::Result<()> {
    let coord = gui.coord().clone();
    let mode = gui.screen_mode();
    let log_visible = gui.command_log_visible();

    let mut items = Vec::new();
    for m in [ScreenMode::Normal, ScreenMode::Half, ScreenMode::Full] {
        let coord = coord.clone();
        items.push(
            MenuItem::new(format!("{:?}", m), move || {
                coord.on_ui_thread(move |gui: &mut Gui| {
                    gui.set_screen_mode(m);
                    Ok(())
                });
                Ok(())
            })
            .widget(MenuWidget::Radio(m == mode))
            .section("Screen mode"),
        );
    }
    {
        let coord = coord.clone();
        items.push(
            MenuItem::new("Show command log", move || {
                coord.on_ui_thread(|gui: &mut Gui| {
                    gui.toggle_command_log();
                    Ok(())
                });
                Ok(())
            })
            .key('@')
            .widget(MenuWidget::Checkbox(log_visible))
            .section("View"),
        );
    }
    items.push(
        MenuItem::new("Refresh", move || {
            coord.on_ui_thread(|gui: &mut Gui| {
                gui.log().log_action("Refresh");
                gui.refresher().refresh(RefreshOptions::all())
            });
            Ok(())
        })
        .key('R')
        .tooltip("Reload everything from the repository")
        .section("Repository"),
    );
    gui.popups().menu(MenuOpts::new("Options", items))
}
