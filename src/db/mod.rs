pub mod postgres;

pub use postgres::{DashboardStats, NewOrder, NewSignal, NewUser, PostgresPersistence};
