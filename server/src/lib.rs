// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::sync::Arc;

pub mod config;
pub mod database;
pub mod handlers;
pub mod routes;
pub mod scheduler;
pub mod store;

use store::TaskStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub evaluate_on_list: bool,
}

impl AppState {
    pub fn new(store: impl TaskStore + 'static, evaluate_on_list: bool) -> Self {
        Self {
            store: Arc::new(store),
            evaluate_on_list,
        }
    }
}
