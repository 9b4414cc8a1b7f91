//! Modal interaction: confirmations, prompts, menus and toasts.
//!
//! At most one modal request is showing at a time. The state lives behind the
//! Popup domain mutex; a second request while one is showing is rejected with
//! [`GuiError::PopupAlreadyShowing`]. Resolving a request returns the state to
//! idle before the handler runs, so handlers may open the next popup.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    context::ContextKey,
    error::GuiError,
    locks::{Domain, DomainMutex},
    suggestions::{Suggestion, SuggestionsFn},
    tasks::{Coordinator, UiState},
};

pub type Handler = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
pub type InputHandler = Box<dyn FnOnce(String) -> anyhow::Result<()> + Send>;
pub type ConfirmValidator = Box<dyn Fn() -> anyhow::Result<()> + Send>;
pub type InputValidator = Box<dyn Fn(&str) -> anyhow::Result<()> + Send>;
pub type DeleteSuggestionHandler = Box<dyn FnMut(&Suggestion) -> anyhow::Result<()> + Send>;

const MASK_CHAR: char = '*';

pub struct ConfirmOpts {
    pub title: String,
    pub prompt: String,
    pub on_confirm: Handler,
    pub on_close: Option<Handler>,
    /// Checked before closing; a failure keeps the popup open with the error shown.
    pub validate: Option<ConfirmValidator>,
}

impl ConfirmOpts {
    pub fn new<F>(title: impl Into<String>, prompt: impl Into<String>, on_confirm: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            on_confirm: Box::new(on_confirm),
            on_close: None,
            validate: None,
        }
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + 'static,
    {
        self.validate = Some(Box::new(f));
        self
    }
}

pub struct PromptOpts {
    pub title: String,
    pub initial: String,
    pub on_confirm: InputHandler,
    pub on_close: Option<Handler>,
    pub validate: Option<InputValidator>,
    pub suggestions: Option<SuggestionsFn>,
    /// Accepting a suggestion copies it into the input instead of submitting it.
    pub allow_edit_suggestion: bool,
    pub on_delete_suggestion: Option<DeleteSuggestionHandler>,
    pub mask: bool,
}

impl PromptOpts {
    pub fn new<F>(title: impl Into<String>, on_confirm: F) -> Self
    where
        F: FnOnce(String) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            title: title.into(),
            initial: String::new(),
            on_confirm: Box::new(on_confirm),
            on_close: None,
            validate: None,
            suggestions: None,
            allow_edit_suggestion: false,
            on_delete_suggestion: None,
            mask: false,
        }
    }

    pub fn initial(mut self, text: impl Into<String>) -> Self {
        self.initial = text.into();
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + 'static,
    {
        self.validate = Some(Box::new(f));
        self
    }

    pub fn suggestions(mut self, f: SuggestionsFn) -> Self {
        self.suggestions = Some(f);
        self
    }

    pub fn allow_edit_suggestion(mut self) -> Self {
        self.allow_edit_suggestion = true;
        self
    }

    pub fn on_delete_suggestion<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Suggestion) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_delete_suggestion = Some(Box::new(f));
        self
    }

    pub fn mask(mut self) -> Self {
        self.mask = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisabledReason {
    pub text: String,
    pub show_error_in_panel: bool,
}

impl DisabledReason {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            show_error_in_panel: false,
        }
    }

    pub fn in_panel(mut self) -> Self {
        self.show_error_in_panel = true;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MenuWidget {
    #[default]
    None,
    Checkbox(bool),
    Radio(bool),
}

impl MenuWidget {
    pub fn render(self) -> &'static str {
        match self {
            MenuWidget::None => "",
            MenuWidget::Checkbox(true) => "[x] ",
            MenuWidget::Checkbox(false) => "[ ] ",
            MenuWidget::Radio(true) => "(•) ",
            MenuWidget::Radio(false) => "( ) ",
        }
    }
}

pub struct MenuItem {
    pub label: String,
    pub key: Option<char>,
    pub tooltip: Option<String>,
    pub widget: MenuWidget,
    pub section: Option<String>,
    pub opens_menu: bool,
    pub disabled_reason: Option<DisabledReason>,
    /// `None` just closes the menu.
    pub on_press: Option<Handler>,
}

impl MenuItem {
    pub fn new<F>(label: impl Into<String>, on_press: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            key: None,
            tooltip: None,
            widget: MenuWidget::None,
            section: None,
            opens_menu: false,
            disabled_reason: None,
            on_press: Some(Box::new(on_press)),
        }
    }

    fn cancel() -> Self {
        Self {
            label: "Cancel".to_string(),
            key: None,
            tooltip: None,
            widget: MenuWidget::None,
            section: None,
            opens_menu: false,
            disabled_reason: None,
            on_press: None,
        }
    }

    pub fn key(mut self, key: char) -> Self {
        self.key = Some(key);
        self
    }

    pub fn tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn widget(mut self, widget: MenuWidget) -> Self {
        self.widget = widget;
        self
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn opens_menu(mut self) -> Self {
        self.opens_menu = true;
        self
    }

    pub fn disabled(mut self, reason: DisabledReason) -> Self {
        self.disabled_reason = Some(reason);
        self
    }

    fn display_label(&self) -> String {
        let mut label = format!("{}{}", self.widget.render(), self.label);
        if self.opens_menu {
            label.push_str("...");
        }
        label
    }
}

pub struct MenuOpts {
    pub title: String,
    /// Shown above the items.
    pub prompt: Option<String>,
    pub items: Vec<MenuItem>,
    pub hide_cancel: bool,
}

impl MenuOpts {
    pub fn new(title: impl Into<String>, items: Vec<MenuItem>) -> Self {
        Self {
            title: title.into(),
            prompt: None,
            items,
            hide_cancel: false,
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn hide_cancel(mut self) -> Self {
        self.hide_cancel = true;
        self
    }
}

pub enum ModalRequest {
    Confirm(ConfirmOpts),
    Prompt(PromptOpts),
    Menu(MenuOpts),
}

impl ModalRequest {
    pub fn title(&self) -> &str {
        match self {
            ModalRequest::Confirm(o) => &o.title,
            ModalRequest::Prompt(o) => &o.title,
            ModalRequest::Menu(o) => &o.title,
        }
    }

    pub fn context_key(&self) -> ContextKey {
        match self {
            ModalRequest::Confirm(_) => ContextKey::Confirmation,
            ModalRequest::Prompt(_) => ContextKey::Prompt,
            ModalRequest::Menu(_) => ContextKey::Menu,
        }
    }
}

impl fmt::Debug for ModalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModalRequest")
            .field(&self.context_key())
            .field(&self.title())
            .finish()
    }
}

/// How the user ended a modal request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Enter: confirm, submit the prompt, or press the selected menu item.
    Confirm,
    /// Esc.
    Close,
    /// Press the menu item at this index.
    Press(usize),
}

struct Showing {
    request: ModalRequest,
    edit: EditState,
}

/// Everything about a showing popup that the user changes.
#[derive(Default)]
struct EditState {
    input: String,
    error: Option<String>,
    suggestions: Vec<Suggestion>,
    selected_suggestion: Option<usize>,
    selected_item: usize,
}

impl Showing {
    fn new(request: ModalRequest, suggestions: Vec<Suggestion>) -> Self {
        let mut edit = EditState {
            suggestions,
            ..EditState::default()
        };
        match &request {
            ModalRequest::Prompt(o) => edit.input = o.initial.clone(),
            ModalRequest::Menu(o) => {
                edit.selected_item = o
                    .items
                    .iter()
                    .position(|i| i.disabled_reason.is_none())
                    .unwrap_or(0);
            }
            ModalRequest::Confirm(_) => {}
        }
        Self { request, edit }
    }

    fn suggestions_fn(&self) -> Option<SuggestionsFn> {
        match &self.request {
            ModalRequest::Prompt(o) => o.suggestions.clone(),
            _ => None,
        }
    }
}

#[derive(Default)]
enum ModalState {
    #[default]
    Idle,
    Showing(Box<Showing>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuItemView {
    pub label: String,
    pub key: Option<char>,
    pub tooltip: Option<String>,
    pub section: Option<String>,
    pub disabled: Option<String>,
}

/// Render-ready copy of the showing popup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopupView {
    pub key: ContextKey,
    pub title: String,
    pub prompt: Option<String>,
    /// Input as drawn; masked prompts show one `*` per character.
    pub input: String,
    pub error: Option<String>,
    pub suggestions: Vec<String>,
    pub selected_suggestion: Option<usize>,
    pub items: Vec<MenuItemView>,
    pub selected_item: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Status,
    Error,
}

#[derive(Clone, Debug)]
pub struct Toast {
    pub message: String,
    pub kind: ToastKind,
    pub expires: Instant,
}

/// Short-lived notifications, newest last.
#[derive(Clone)]
pub struct Toasts {
    ttl: Duration,
    items: Arc<Mutex<Vec<Toast>>>,
}

impl Toasts {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, message: impl Into<String>, kind: ToastKind) {
        let message = message.into();
        tracing::debug!(?kind, %message, "toast");
        self.items.lock().push(Toast {
            message,
            kind,
            expires: Instant::now() + self.ttl,
        });
    }

    /// Toasts still live at `now`. Expired ones are dropped.
    pub fn active(&self, now: Instant) -> Vec<Toast> {
        let mut items = self.items.lock();
        items.retain(|t| t.expires > now);
        items.clone()
    }
}

struct PopupsInner<S> {
    coord: Coordinator<S>,
    state: DomainMutex<ModalState>,
    toasts: Toasts,
}

pub struct Popups<S> {
    inner: Arc<PopupsInner<S>>,
}

impl<S> Clone for Popups<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: UiState> Popups<S> {
    pub fn new(coord: Coordinator<S>, toast_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(PopupsInner {
                coord,
                state: DomainMutex::new(Domain::Popup, ModalState::Idle),
                toasts: Toasts::new(toast_ttl),
            }),
        }
    }

    pub fn toasts(&self) -> &Toasts {
        &self.inner.toasts
    }

    /// Show `request`. Off the UI thread the request is queued for it instead,
    /// and a rejection then reaches the UI error handler.
    pub fn show(&self, request: ModalRequest) -> anyhow::Result<()> {
        if !self.inner.coord.ui_thread().is_ui_thread() {
            let this = self.clone();
            self.inner.coord.on_ui_thread(move |_| this.show(request));
            return Ok(());
        }

        if let ModalState::Showing(current) = &*self.inner.state.lock() {
            return Err(GuiError::PopupAlreadyShowing {
                current: current.request.title().to_string(),
                requested: request.title().to_string(),
            }
            .into());
        }

        // Suggestions are computed outside the lock.
        let suggestions = match &request {
            ModalRequest::Prompt(o) => o
                .suggestions
                .as_ref()
                .map(|f| f(&o.initial))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let mut request = request;
        if let ModalRequest::Menu(menu) = &mut request
            && !menu.hide_cancel
        {
            menu.items.push(MenuItem::cancel());
        }
        tracing::debug!(?request, "showing popup");

        let mut state = self.inner.state.lock();
        if let ModalState::Showing(current) = &*state {
            return Err(GuiError::PopupAlreadyShowing {
                current: current.request.title().to_string(),
                requested: request.title().to_string(),
            }
            .into());
        }
        *state = ModalState::Showing(Box::new(Showing::new(request, suggestions)));
        Ok(())
    }

    pub fn confirm(&self, opts: ConfirmOpts) -> anyhow::Result<()> {
        self.show(ModalRequest::Confirm(opts))
    }

    /// Ask for confirmation only when `condition` holds; otherwise confirm
    /// straight away. Like a confirmed popup, the handler runs on the UI thread.
    pub fn confirm_if(&self, condition: bool, opts: ConfirmOpts) -> anyhow::Result<()> {
        if condition {
            return self.confirm(opts);
        }
        if !self.inner.coord.ui_thread().is_ui_thread() {
            let on_confirm = opts.on_confirm;
            self.inner.coord.on_ui_thread(move |_| on_confirm());
            return Ok(());
        }
        (opts.on_confirm)()
    }

    pub fn prompt(&self, opts: PromptOpts) -> anyhow::Result<()> {
        self.show(ModalRequest::Prompt(opts))
    }

    pub fn menu(&self, opts: MenuOpts) -> anyhow::Result<()> {
        self.show(ModalRequest::Menu(opts))
    }

    /// A confirmation whose only outcome is closing.
    pub fn alert(&self, title: &str, message: &str) -> anyhow::Result<()> {
        self.confirm(ConfirmOpts::new(title, message, || Ok(())))
    }

    pub fn error_popup(&self, message: &str) -> anyhow::Result<()> {
        self.alert("Error", message)
    }

    pub fn toast(&self, message: impl Into<String>) {
        self.inner.toasts.push(message, ToastKind::Status);
    }

    pub fn error_toast(&self, message: impl Into<String>) {
        self.inner.toasts.push(message, ToastKind::Error);
    }

    /// Show `message` as the showing popup's inline error. False when idle.
    pub fn set_inline_error(&self, message: &str) -> bool {
        match &mut *self.inner.state.lock() {
            ModalState::Showing(s) => {
                s.edit.error = Some(message.to_string());
                true
            }
            ModalState::Idle => false,
        }
    }

    pub fn is_showing(&self) -> bool {
        matches!(&*self.inner.state.lock(), ModalState::Showing(_))
    }

    /// Context key of the showing popup.
    pub fn current_key(&self) -> Option<ContextKey> {
        match &*self.inner.state.lock() {
            ModalState::Idle => None,
            ModalState::Showing(s) => Some(s.request.context_key()),
        }
    }

    /// Current prompt text, unmasked.
    pub fn input(&self) -> Option<String> {
        match &*self.inner.state.lock() {
            ModalState::Showing(s) if matches!(s.request, ModalRequest::Prompt(_)) => {
                Some(s.edit.input.clone())
            }
            _ => None,
        }
    }

    /// End the showing request and run the matching handler.
    ///
    /// The popup is closed before the handler runs. A failed validation
    /// reopens it with the error shown inline, and a disabled menu item leaves
    /// it open and returns [`GuiError::Disabled`].
    pub fn resolve(&self, resolution: Resolution) -> anyhow::Result<()> {
        self.inner.coord.ui_thread().assert("resolving a popup");
        let taken = std::mem::take(&mut *self.inner.state.lock());
        let ModalState::Showing(showing) = taken else {
            return Err(GuiError::NoPopup.into());
        };
        let Showing { request, mut edit } = *showing;
        tracing::debug!(?request, ?resolution, "resolving popup");

        match (request, resolution) {
            (ModalRequest::Confirm(opts), Resolution::Confirm) => {
                let invalid = opts.validate.as_ref().and_then(|v| v().err());
                if let Some(e) = invalid {
                    edit.error = Some(e.to_string());
                    self.restore(ModalRequest::Confirm(opts), edit);
                    return Ok(());
                }
                (opts.on_confirm)()
            }
            (ModalRequest::Confirm(opts), Resolution::Close) => run_handler(opts.on_close),
            (ModalRequest::Prompt(opts), Resolution::Confirm) => {
                let invalid = opts.validate.as_ref().and_then(|v| v(&edit.input).err());
                if let Some(e) = invalid {
                    edit.error = Some(e.to_string());
                    self.restore(ModalRequest::Prompt(opts), edit);
                    return Ok(());
                }
                (opts.on_confirm)(edit.input)
            }
            (ModalRequest::Prompt(opts), Resolution::Close) => run_handler(opts.on_close),
            (ModalRequest::Menu(opts), Resolution::Confirm) => {
                let selected = edit.selected_item;
                self.press(opts, edit, selected)
            }
            (ModalRequest::Menu(opts), Resolution::Press(index)) => self.press(opts, edit, index),
            (ModalRequest::Menu(_), Resolution::Close) => Ok(()),
            (request @ (ModalRequest::Confirm(_) | ModalRequest::Prompt(_)), Resolution::Press(_)) => {
                // Only menus have items to press.
                self.restore(request, edit);
                Ok(())
            }
        }
    }

    fn press(&self, mut menu: MenuOpts, edit: EditState, index: usize) -> anyhow::Result<()> {
        let disabled = match menu.items.get(index) {
            None => {
                self.restore(ModalRequest::Menu(menu), edit);
                return Ok(());
            }
            Some(item) => item.disabled_reason.clone(),
        };
        if let Some(reason) = disabled {
            self.restore(ModalRequest::Menu(menu), edit);
            return Err(GuiError::Disabled {
                text: reason.text,
                show_in_panel: reason.show_error_in_panel,
            }
            .into());
        }
        let item = menu.items.swap_remove(index);
        tracing::info!(label = %item.label, "menu item pressed");
        run_handler(item.on_press)
    }

    fn restore(&self, request: ModalRequest, edit: EditState) {
        let mut state = self.inner.state.lock();
        if matches!(&*state, ModalState::Idle) {
            *state = ModalState::Showing(Box::new(Showing { request, edit }));
        } else {
            tracing::warn!("popup replaced while resolving; dropping the old one");
        }
    }

    /// Press the menu item bound to `key`. Returns false if no item has it.
    pub fn press_key(&self, key: char) -> anyhow::Result<bool> {
        let index = match &*self.inner.state.lock() {
            ModalState::Showing(s) => match &s.request {
                ModalRequest::Menu(m) => m.items.iter().position(|i| i.key == Some(key)),
                _ => None,
            },
            ModalState::Idle => None,
        };
        match index {
            Some(i) => self.resolve(Resolution::Press(i)).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn type_char(&self, ch: char) {
        self.edit_input(|input| input.push(ch));
    }

    pub fn backspace(&self) {
        self.edit_input(|input| {
            input.pop();
        });
    }

    pub fn set_input(&self, text: &str) {
        self.edit_input(|input| *input = text.to_string());
    }

    fn edit_input(&self, change: impl FnOnce(&mut String)) {
        let (suggest, input) = {
            let mut state = self.inner.state.lock();
            let ModalState::Showing(s) = &mut *state else {
                return;
            };
            if !matches!(s.request, ModalRequest::Prompt(_)) {
                return;
            }
            change(&mut s.edit.input);
            s.edit.error = None;
            (s.suggestions_fn(), s.edit.input.clone())
        };
        let Some(suggest) = suggest else {
            return;
        };
        let suggestions = suggest(&input);
        if let ModalState::Showing(s) = &mut *self.inner.state.lock() {
            s.edit.suggestions = suggestions;
            s.edit.selected_suggestion = None;
        }
    }

    /// Move through the suggestions, wrapping around.
    pub fn select_next_suggestion(&self) {
        if let ModalState::Showing(s) = &mut *self.inner.state.lock() {
            let len = s.edit.suggestions.len();
            if len > 0 {
                s.edit.selected_suggestion =
                    Some(s.edit.selected_suggestion.map_or(0, |i| (i + 1) % len));
            }
        }
    }

    pub fn select_prev_suggestion(&self) {
        if let ModalState::Showing(s) = &mut *self.inner.state.lock() {
            let len = s.edit.suggestions.len();
            if len > 0 {
                s.edit.selected_suggestion =
                    Some(s.edit.selected_suggestion.map_or(len - 1, |i| (i + len - 1) % len));
            }
        }
    }

    /// Use the selected suggestion. It replaces the input when suggestions are
    /// editable and is submitted otherwise.
    pub fn accept_suggestion(&self) -> anyhow::Result<()> {
        let submit = {
            let mut state = self.inner.state.lock();
            let ModalState::Showing(s) = &mut *state else {
                return Err(GuiError::NoPopup.into());
            };
            let ModalRequest::Prompt(opts) = &s.request else {
                return Ok(());
            };
            let allow_edit = opts.allow_edit_suggestion;
            let chosen = s
                .edit
                .selected_suggestion
                .and_then(|i| s.edit.suggestions.get(i))
                .map(|c| c.value.clone());
            let Some(value) = chosen else {
                return Ok(());
            };
            s.edit.input = value;
            s.edit.error = None;
            !allow_edit
        };
        if submit {
            self.resolve(Resolution::Confirm)
        } else {
            let input = self.input().unwrap_or_default();
            self.set_input(&input);
            Ok(())
        }
    }

    /// Delete the selected suggestion through the prompt's hook, then
    /// recompute the list.
    pub fn delete_suggestion(&self) -> anyhow::Result<()> {
        let (mut hook, chosen) = {
            let mut state = self.inner.state.lock();
            let ModalState::Showing(s) = &mut *state else {
                return Err(GuiError::NoPopup.into());
            };
            let chosen = s
                .edit
                .selected_suggestion
                .and_then(|i| s.edit.suggestions.get(i))
                .cloned();
            let Some(chosen) = chosen else {
                return Ok(());
            };
            let ModalRequest::Prompt(opts) = &mut s.request else {
                return Ok(());
            };
            let Some(hook) = opts.on_delete_suggestion.take() else {
                return Ok(());
            };
            (hook, chosen)
        };
        // The hook may touch other domains, so it runs unlocked.
        let result = hook(&chosen);
        if let ModalState::Showing(s) = &mut *self.inner.state.lock()
            && let ModalRequest::Prompt(opts) = &mut s.request
        {
            opts.on_delete_suggestion = Some(hook);
        }
        result?;
        let input = self.input().unwrap_or_default();
        self.set_input(&input);
        Ok(())
    }

    /// Move the menu selection. Disabled items can be selected but not pressed.
    pub fn move_menu_selection(&self, delta: isize) {
        if let ModalState::Showing(s) = &mut *self.inner.state.lock()
            && let ModalRequest::Menu(m) = &s.request
            && !m.items.is_empty()
        {
            let max = m.items.len() as isize - 1;
            s.edit.selected_item = (s.edit.selected_item as isize + delta).clamp(0, max) as usize;
        }
    }

    /// Snapshot of the showing popup for rendering.
    pub fn view(&self) -> Option<PopupView> {
        let state = self.inner.state.lock();
        let ModalState::Showing(s) = &*state else {
            return None;
        };
        let mut view = PopupView {
            key: s.request.context_key(),
            title: s.request.title().to_string(),
            prompt: None,
            input: String::new(),
            error: s.edit.error.clone(),
            suggestions: s.edit.suggestions.iter().map(|x| x.label.clone()).collect(),
            selected_suggestion: s.edit.selected_suggestion,
            items: Vec::new(),
            selected_item: s.edit.selected_item,
        };
        match &s.request {
            ModalRequest::Confirm(o) => view.prompt = Some(o.prompt.clone()),
            ModalRequest::Prompt(o) => {
                view.input = if o.mask {
                    s.edit.input.chars().map(|_| MASK_CHAR).collect()
                } else {
                    s.edit.input.clone()
                };
            }
            ModalRequest::Menu(o) => {
                view.prompt = o.prompt.clone();
                view.items = o
                    .items
                    .iter()
                    .map(|i| MenuItemView {
                        label: i.display_label(),
                        key: i.key,
                        tooltip: i.tooltip.clone(),
                        section: i.section.clone(),
                        disabled: i.disabled_reason.as_ref().map(|r| r.text.clone()),
                    })
                    .collect();
            }
        }
        Some(view)
    }
}

fn run_handler(handler: Option<Handler>) -> anyhow::Result<()> {
    match handler {
        Some(f) => f(),
        None => Ok(()),
    }
}
