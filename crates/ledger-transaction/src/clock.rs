//! # clock
//!
//! why: streams are per account-day, so the coordinator must know what "today" is
//! relations: consulted by coordinator.rs for handler creation and day rollover
//! what: Clock trait, SystemClock (local date), MockClock for tests

use chrono::{Days, Local, NaiveDate};
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug)]
pub struct MockClock {
    today: RwLock<NaiveDate>,
}

impl Clock for MockClock {
    fn today(&self) -> NaiveDate {
        *self.today.read()
    }
}

impl MockClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: RwLock::new(today),
        }
    }

    pub fn set_date(&self, date: NaiveDate) {
        *self.today.write() = date;
    }

    pub fn advance_days(&self, days: u64) {
        let mut today = self.today.write();
        if let Some(next) = today.checked_add_days(Days::new(days)) {
            *today = next;
        }
    }
}
