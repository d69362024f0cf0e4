//! Control-loop state: the current session, the type filter, expansion
//! and sizing, plus the interaction modes driven by the terminal UI.
//! Nothing here touches the terminal so the whole flow is testable with
//! a scripted [`DiscoveryService`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;
use crate::error::{DiscoveryError, ReconcileError};
use crate::expansion::ExpansionTracker;
use crate::filter::{TypeChoice, TypeFilter};
use crate::mdns::{validate_service_type, DiscoveryHandle, DiscoveryService};
use crate::session::{EventSink, Session, SessionEvent, SessionId};
use crate::settings::SettingsStore;
use crate::sizing::SizingPolicy;
use crate::tree::{NodeKey, VisibleRow};

/// Side effects the UI loop performs for the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Quit,
    ScanTypes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDialog {
    pub entries: Vec<(String, TypeChoice)>,
    pub cursor: usize,
    /// The "manage all" box
    pub all: TypeChoice,
    pub scanning: bool,
}

impl FilterDialog {
    /// Scanned types not listed yet come in Checked while "manage all" is
    /// Checked and Unchecked otherwise.
    fn merge(&mut self, discovered: BTreeSet<String>) {
        let choice = match self.all {
            TypeChoice::Checked => TypeChoice::Checked,
            _ => TypeChoice::Unchecked,
        };
        for service_type in discovered {
            if !self.entries.iter().any(|(t, _)| *t == service_type) {
                self.entries.push((service_type, choice));
            }
        }
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
    }

    /// Cycles "manage all" and copies it onto the entries. Checked entries
    /// only follow when it becomes Unchecked.
    fn toggle_all(&mut self) {
        self.all = self.all.next();
        for (_, choice) in &mut self.entries {
            if *choice != TypeChoice::Checked || self.all == TypeChoice::Unchecked {
                *choice = self.all;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Browse,
    AddType { input: String },
    Filter(FilterDialog),
}

pub struct App<D: DiscoveryService> {
    discovery: D,
    settings: Box<dyn SettingsStore>,
    filter: TypeFilter,
    expansion: ExpansionTracker,
    sizing: SizingPolicy,
    session: Arc<Session>,
    handle: Option<DiscoveryHandle>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub mode: Mode,
    pub warnings: VecDeque<String>,
    pub selected: usize,
    pub target_height: u32,
}

impl<D: DiscoveryService> App<D> {
    pub fn new(
        discovery: D,
        settings: Box<dyn SettingsStore>,
        sizing: SizingPolicy,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let filter = TypeFilter::load(settings.as_ref());
        let expansion = ExpansionTracker::load(settings.as_ref());
        tracing::info!(known = filter.known().len(), active = ?filter.active(), "Loaded type filter");
        Self {
            discovery,
            settings,
            filter,
            expansion,
            sizing,
            session: Arc::new(Session::new(0, BTreeSet::new())),
            handle: None,
            events_tx,
            mode: Mode::Browse,
            warnings: VecDeque::new(),
            selected: 0,
            target_height: sizing.base_offset,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[cfg(test)]
    pub fn filter(&self) -> &TypeFilter {
        &self.filter
    }

    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        self.session.tree().visible_rows()
    }

    fn warn_user(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push_back(message);
    }

    /// Tears down the current session and tree, then browses the active
    /// types from scratch.
    pub fn start_session(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.discovery.stop(handle);
        }

        self.session.tree().clear();

        let id: SessionId = self.session.id() + 1;
        let types = self.filter.active().clone();
        self.session = Arc::new(Session::new(id, types.clone()));
        self.selected = 0;

        let sink = EventSink::new(id, self.events_tx.clone());
        match self.discovery.start(&types, sink) {
            Ok(subscription) => {
                self.handle = Some(subscription.handle);
                for error in subscription.rejected {
                    self.warn_user(error.to_string());
                }
            }
            Err(e) => self.warn_user(format!("Failed to start discovery: {}", e)),
        }
        tracing::info!(session = id, types = ?types, "Session started");
        self.refresh_view();
    }

    /// Applies a marshalled event if it belongs to the current session.
    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        if event.session != self.session.id() {
            tracing::debug!(
                session = event.session,
                current = self.session.id(),
                kind = %event.event.kind(),
                service_type = event.event.service_type(),
                service = %event.event.name(),
                "Dropping event from a closed session"
            );
            return;
        }

        let session = self.session.clone();
        match session.apply(event.event).await {
            Ok(()) => {}
            Err(e @ ReconcileError::Orphan { .. }) => tracing::debug!("{}", e),
            Err(e @ ReconcileError::MultipleMatch { .. }) => self.warn_user(e.to_string()),
            Err(ReconcileError::Tree(e)) => tracing::warn!("{}", e),
        }
        self.refresh_view();
    }

    /// Restores expansion on changed rows and recomputes the target height.
    fn refresh_view(&mut self) {
        let session = self.session.clone();
        let mut tree = session.tree();
        let changes = tree.take_changes();
        self.expansion.restore(&mut tree, &changes);
        self.target_height = self.sizing.target_height(&tree);
        let rows = tree.visible_rows().len();
        self.selected = self.selected.min(rows.saturating_sub(1));
    }

    pub fn set_expanded(&mut self, key: &NodeKey, expanded: bool) {
        let session = self.session.clone();
        let result = {
            let mut tree = session.tree();
            self.expansion
                .toggled(&mut tree, key, expanded, self.settings.as_mut())
        };
        if let Err(e) = result {
            self.warn_user(format!("Failed to save expansion state: {}", e));
        }
        self.refresh_view();
    }

    fn selected_key(&self) -> Option<(NodeKey, bool)> {
        let rows = self.visible_rows();
        let row = rows.get(self.selected)?;
        let key = row.key.clone()?;
        row.has_children.then_some((key, row.expanded))
    }

    fn expand_selected(&mut self, expanded: Option<bool>) {
        if let Some((key, current)) = self.selected_key() {
            let target = expanded.unwrap_or(!current);
            if target != current {
                self.set_expanded(&key, target);
            }
        }
    }

    /// Adds a typed-in type to the known set. A malformed type is rejected
    /// with a warning and nothing is saved.
    pub fn add_type(&mut self, service_type: &str) {
        let service_type = service_type.trim();
        if service_type.is_empty() {
            return;
        }
        if let Err(e) = validate_service_type(service_type) {
            self.warn_user(e.to_string());
            return;
        }
        match self.filter.add_type(service_type, self.settings.as_mut()) {
            Ok(true) => self.start_session(),
            Ok(false) => {}
            Err(e) => self.warn_user(format!("Failed to save types: {}", e)),
        }
    }

    pub fn open_filter(&mut self) -> Effect {
        self.mode = Mode::Filter(FilterDialog {
            entries: self.filter.choices(),
            cursor: 0,
            all: TypeChoice::Unchecked,
            scanning: true,
        });
        Effect::ScanTypes
    }

    /// Result of the background type scan; merged into an open dialog only.
    pub fn types_scanned(&mut self, result: Result<BTreeSet<String>, DiscoveryError>) {
        let discovered = match result {
            Ok(found) => found,
            Err(e) => {
                self.warn_user(format!("Type scan failed: {}", e));
                BTreeSet::new()
            }
        };
        if let Mode::Filter(dialog) = &mut self.mode {
            dialog.scanning = false;
            dialog.merge(discovered);
        }
    }

    pub fn accept_filter(&mut self, choices: &[(String, TypeChoice)]) {
        match self.filter.set_active_types(choices, self.settings.as_mut()) {
            Ok(_) => self.start_session(),
            Err(e) => self.warn_user(format!("Failed to save type filter: {}", e)),
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Effect {
        if !self.warnings.is_empty() {
            self.warnings.pop_front();
            return Effect::None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
        {
            return Effect::Quit;
        }

        match std::mem::replace(&mut self.mode, Mode::Browse) {
            Mode::Browse => self.browse_key(key),
            Mode::AddType { input } => {
                self.add_type_key(key, input);
                Effect::None
            }
            Mode::Filter(dialog) => {
                self.filter_key(key, dialog);
                Effect::None
            }
        }
    }

    fn browse_key(&mut self, key: KeyEvent) -> Effect {
        match key.code {
            KeyCode::Char('q') => return Effect::Quit,
            KeyCode::Char('r') => self.start_session(),
            KeyCode::Char('a') => {
                self.mode = Mode::AddType {
                    input: String::new(),
                }
            }
            KeyCode::Char('f') => return self.open_filter(),
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let rows = self.visible_rows().len();
                if self.selected + 1 < rows {
                    self.selected += 1;
                }
            }
            KeyCode::Enter | KeyCode::Char(' ') => self.expand_selected(None),
            KeyCode::Right => self.expand_selected(Some(true)),
            KeyCode::Left => self.expand_selected(Some(false)),
            _ => {}
        }
        Effect::None
    }

    fn add_type_key(&mut self, key: KeyEvent, mut input: String) {
        match key.code {
            KeyCode::Enter => {
                self.add_type(&input);
                return;
            }
            KeyCode::Esc => return,
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) => input.push(c),
            _ => {}
        }
        self.mode = Mode::AddType { input };
    }

    fn filter_key(&mut self, key: KeyEvent, mut dialog: FilterDialog) {
        match key.code {
            KeyCode::Esc => return,
            KeyCode::Enter => {
                self.accept_filter(&dialog.entries);
                return;
            }
            KeyCode::Up | KeyCode::Char('k') => {
                dialog.cursor = dialog.cursor.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if dialog.cursor + 1 < dialog.entries.len() {
                    dialog.cursor += 1;
                }
            }
            KeyCode::Char(' ') => {
                if let Some((_, choice)) = dialog.entries.get_mut(dialog.cursor) {
                    *choice = choice.next();
                }
            }
            KeyCode::Char('t') => dialog.toggle_all(),
            _ => {}
        }
        self.mode = Mode::Filter(dialog);
    }

    /// Closes the active discovery session.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.discovery.stop(handle);
        }
        tracing::info!("Application closing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use shared::protocol::{KEY_SERVERS_EXPANDED, KEY_TYPES, KEY_TYPES_FILTERED};
    use shared::types::{DiscoveryEvent, ServiceDetails};
    use crate::mdns::Subscription;
    use crate::settings::MemorySettings;

    const HTTP: &str = "_http._tcp.local.";

    /// Records every start and hands out idle handles
    #[derive(Clone, Default)]
    struct ScriptedDiscovery {
        starts: Arc<Mutex<Vec<BTreeSet<String>>>>,
        reject: Option<String>,
    }

    impl DiscoveryService for ScriptedDiscovery {
        fn start(&self, types: &BTreeSet<String>, _sink: EventSink) -> Result<Subscription, DiscoveryError> {
            self.starts.lock().unwrap().push(types.clone());
            let rejected = self
                .reject
                .iter()
                .map(|t| DiscoveryError::MalformedType {
                    service_type: t.clone(),
                    reason: "bad".to_string(),
                })
                .collect();
            Ok(Subscription {
                handle: DiscoveryHandle::idle(),
                rejected,
            })
        }
    }

    fn app_with(
        settings: MemorySettings,
        discovery: ScriptedDiscovery,
    ) -> (App<ScriptedDiscovery>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sizing = SizingPolicy {
            base_offset: 4,
            row_height: 1,
        };
        (App::new(discovery, Box::new(settings), sizing, tx), rx)
    }

    fn added(name: &str, server: &str) -> DiscoveryEvent {
        DiscoveryEvent::Added {
            name: name.to_string(),
            service_type: HTTP.to_string(),
            details: ServiceDetails {
                server: server.to_string(),
                port: 80,
                ipv4: Vec::new(),
                ipv6: Vec::new(),
                properties: BTreeMap::from([("path".to_string(), "/".to_string())]),
            },
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_start_session_browses_active_types() {
        let mut settings = MemorySettings::default();
        settings.set(KEY_TYPES_FILTERED, &format!(r#"["{}"]"#, HTTP)).unwrap();
        let discovery = ScriptedDiscovery::default();
        let (mut app, _rx) = app_with(settings, discovery.clone());

        app.start_session();
        assert_eq!(app.session().id(), 1);
        assert_eq!(
            *discovery.starts.lock().unwrap(),
            vec![BTreeSet::from([HTTP.to_string()])]
        );
    }

    #[tokio::test]
    async fn test_events_from_old_session_are_dropped() {
        let (mut app, _rx) = app_with(MemorySettings::default(), ScriptedDiscovery::default());
        app.start_session();
        app.start_session();

        app.handle_session_event(SessionEvent {
            session: 1,
            event: added("old._http._tcp.local.", "host1.local."),
        })
        .await;
        assert!(app.session().tree().is_empty());

        app.handle_session_event(SessionEvent {
            session: 2,
            event: added("new._http._tcp.local.", "host1.local."),
        })
        .await;
        assert_eq!(app.session().tree().service_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_discards_tree() {
        let (mut app, _rx) = app_with(MemorySettings::default(), ScriptedDiscovery::default());
        app.start_session();
        app.handle_session_event(SessionEvent {
            session: 1,
            event: added("svc._http._tcp.local.", "host1.local."),
        })
        .await;
        assert!(!app.session().tree().is_empty());

        let old = app.session().clone();
        app.handle_key(key(KeyCode::Char('r')));
        assert_eq!(app.session().id(), 2);
        assert!(app.session().tree().is_empty());
        assert!(old.tree().is_empty());
    }

    #[tokio::test]
    async fn test_saved_expansion_is_restored_and_sized() {
        let mut settings = MemorySettings::default();
        settings.set(KEY_SERVERS_EXPANDED, r#"["host1.local."]"#).unwrap();
        let (mut app, _rx) = app_with(settings, ScriptedDiscovery::default());
        app.start_session();
        assert_eq!(app.target_height, 4);

        app.handle_session_event(SessionEvent {
            session: 1,
            event: added("svc._http._tcp.local.", "host1.local."),
        })
        .await;

        let server = NodeKey::Server("host1.local.".to_string());
        assert!(app.session().tree().is_expanded(&server));
        // server row + service row
        assert_eq!(app.target_height, 6);

        // Enter on the service row expands its one attribute
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.target_height, 7);
    }

    #[test]
    fn test_add_type_restarts_only_when_new() {
        let discovery = ScriptedDiscovery::default();
        let (mut app, _rx) = app_with(MemorySettings::default(), discovery.clone());
        app.start_session();

        app.handle_key(key(KeyCode::Char('a')));
        for c in HTTP.chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.mode, Mode::Browse);
        assert!(app.filter().known().contains(HTTP));
        assert!(app.filter().active().is_empty());
        assert_eq!(discovery.starts.lock().unwrap().len(), 2);

        app.add_type(HTTP);
        assert_eq!(discovery.starts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_filter_dialog_flow() {
        let mut settings = MemorySettings::default();
        settings.set(KEY_TYPES, &format!(r#"["{}"]"#, HTTP)).unwrap();
        let discovery = ScriptedDiscovery::default();
        let (mut app, _rx) = app_with(settings, discovery.clone());
        app.start_session();

        assert_eq!(app.handle_key(key(KeyCode::Char('f'))), Effect::ScanTypes);
        app.types_scanned(Ok(BTreeSet::from(["_ssh._tcp.local.".to_string()])));
        let Mode::Filter(dialog) = &app.mode else {
            panic!("filter dialog not open");
        };
        assert!(!dialog.scanning);
        assert_eq!(
            dialog.entries,
            vec![
                (HTTP.to_string(), TypeChoice::Partial),
                ("_ssh._tcp.local.".to_string(), TypeChoice::Unchecked),
            ]
        );

        // Partial -> Checked on the first entry (_http)
        app.handle_key(key(KeyCode::Char(' ')));
        app.handle_key(key(KeyCode::Enter));

        assert_eq!(app.mode, Mode::Browse);
        assert_eq!(app.filter().active(), &BTreeSet::from([HTTP.to_string()]));
        assert_eq!(app.filter().known(), &BTreeSet::from([HTTP.to_string()]));
        assert_eq!(
            discovery.starts.lock().unwrap().last(),
            Some(&BTreeSet::from([HTTP.to_string()]))
        );
    }

    #[test]
    fn test_scanned_types_are_not_kept_without_a_choice() {
        let discovery = ScriptedDiscovery::default();
        let (mut app, _rx) = app_with(MemorySettings::default(), discovery.clone());
        app.start_session();

        app.handle_key(key(KeyCode::Char('f')));
        app.types_scanned(Ok(BTreeSet::from([
            "_a._tcp.local.".to_string(),
            "_b._tcp.local.".to_string(),
        ])));
        app.handle_key(key(KeyCode::Enter));

        assert!(app.filter().known().is_empty());
        assert!(app.filter().active().is_empty());
    }

    #[test]
    fn test_manage_all_keeps_checked_entries() {
        let mut settings = MemorySettings::default();
        settings.set(KEY_TYPES_FILTERED, &format!(r#"["{}"]"#, HTTP)).unwrap();
        let (mut app, _rx) = app_with(settings, ScriptedDiscovery::default());
        app.start_session();
        app.handle_key(key(KeyCode::Char('f')));

        let entries = |app: &App<ScriptedDiscovery>| match &app.mode {
            Mode::Filter(dialog) => (dialog.all, dialog.entries.clone()),
            _ => panic!("filter dialog not open"),
        };

        // Unchecked -> Partial leaves the active type alone
        app.handle_key(key(KeyCode::Char('t')));
        assert_eq!(
            entries(&app),
            (TypeChoice::Partial, vec![(HTTP.to_string(), TypeChoice::Checked)])
        );

        // Partial -> Checked, so a type scanned now comes in Checked
        app.handle_key(key(KeyCode::Char('t')));
        app.types_scanned(Ok(BTreeSet::from(["_ssh._tcp.local.".to_string()])));
        assert_eq!(
            entries(&app).1,
            vec![
                (HTTP.to_string(), TypeChoice::Checked),
                ("_ssh._tcp.local.".to_string(), TypeChoice::Checked),
            ]
        );

        // Checked -> Unchecked clears every entry
        app.handle_key(key(KeyCode::Char('t')));
        assert!(entries(&app).1.iter().all(|(_, c)| *c == TypeChoice::Unchecked));

        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.filter().active(), &BTreeSet::from([HTTP.to_string()]));
    }

    #[test]
    fn test_malformed_type_is_rejected_with_warning() {
        let discovery = ScriptedDiscovery::default();
        let (mut app, _rx) = app_with(MemorySettings::default(), discovery.clone());
        app.start_session();

        app.add_type("not a type");
        assert_eq!(app.warnings.len(), 1);
        assert!(app.warnings[0].contains("not a type"));
        assert!(app.filter().known().is_empty());
        assert_eq!(discovery.starts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_filter_cancel_changes_nothing() {
        let discovery = ScriptedDiscovery::default();
        let (mut app, _rx) = app_with(MemorySettings::default(), discovery.clone());
        app.start_session();
        app.handle_key(key(KeyCode::Char('f')));
        app.types_scanned(Ok(BTreeSet::from([HTTP.to_string()])));
        app.handle_key(key(KeyCode::Char('t')));
        app.handle_key(key(KeyCode::Esc));

        assert_eq!(app.mode, Mode::Browse);
        assert!(app.filter().known().is_empty());
        assert_eq!(discovery.starts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_types_become_warnings() {
        let discovery = ScriptedDiscovery {
            reject: Some("bogus".to_string()),
            ..Default::default()
        };
        let (mut app, _rx) = app_with(MemorySettings::default(), discovery);
        app.start_session();
        assert_eq!(app.warnings.len(), 1);
        assert!(app.warnings[0].contains("bogus"));

        // Any key dismisses the warning instead of acting
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Effect::None);
        assert!(app.warnings.is_empty());
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Effect::Quit);
    }
}
