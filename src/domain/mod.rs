mod academic_year;
mod category;
mod error;
mod integrity;
mod ledger;
mod money;
mod payment;
mod schedule;
mod student;

pub use academic_year::*;
pub use category::*;
pub use error::*;
pub use integrity::*;
pub use ledger::*;
pub use money::*;
pub use payment::*;
pub use schedule::*;
pub use student::*;
