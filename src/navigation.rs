use parking_lot::Mutex;

/// Entry points the data layer can send the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/auth/login",
            Route::Home => "/",
        }
    }
}

/// Whatever owns the screen. Called synchronously from store operations.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Navigator that just remembers where it was sent.
#[derive(Debug, Default)]
pub struct HistoryNavigator {
    history: Mutex<Vec<Route>>,
}

impl HistoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Route> {
        self.history.lock().last().copied()
    }

    pub fn history(&self) -> Vec<Route> {
        self.history.lock().clone()
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, route: Route) {
        tracing::debug!(path = route.path(), "navigate");
        self.history.lock().push(route);
    }
}
