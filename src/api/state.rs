use std::sync::Arc;

use crate::dashboard::{SharedDashboard, ToastLog};

#[derive(Clone)]
pub struct AppState {
    pub dashboard: SharedDashboard,
    /// Same log the controller notifies into.
    pub toasts: Arc<ToastLog>,
}

impl AppState {
    pub fn new(dashboard: SharedDashboard, toasts: Arc<ToastLog>) -> Self {
        Self { dashboard, toasts }
    }
}
