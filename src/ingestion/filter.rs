//! Per-device acceptance policy applied before an event is stored or
//! broadcast.

use crate::db::models::{ClassFilter, DeviceFilter, PathEvent};
use std::fmt;

/// Classes admitted when a device has never had its class list configured
pub const DEFAULT_CLASSES: &[&str] = &["Human", "Car", "Truck", "Bus", "Bike", "Vehicle"];

/// Length of the diagonal of the 0-1000 normalized coordinate space
pub const NORMALIZED_DIAGONAL: f64 = std::f64::consts::SQRT_2 * 1000.0;

/// First failed condition for a rejected event
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Class(String),
    Age { age: f64, min: f64 },
    Distance { percent: f64, min: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Class(class) => write!(f, "class {} not allowed", class),
            Rejection::Age { age, min } => write!(f, "age {:.2}s below minimum {:.2}s", age, min),
            Rejection::Distance { percent, min } => {
                write!(f, "displacement {:.2}% below minimum {:.2}%", percent, min)
            }
        }
    }
}

/// Displacement as a percentage of the normalized diagonal
pub fn displacement_percent(event: &PathEvent) -> f64 {
    event.displacement() / NORMALIZED_DIAGONAL * 100.0
}

fn class_allowed(class: &str, classes: &ClassFilter) -> bool {
    match classes {
        ClassFilter::NotConfigured => DEFAULT_CLASSES.contains(&class),
        ClassFilter::Allowed(allowed) => allowed.iter().any(|c| c == class),
    }
}

/// Check class, age and displacement in that order, stopping at the first failure
pub fn evaluate(event: &PathEvent, filter: &DeviceFilter) -> Result<(), Rejection> {
    if !class_allowed(&event.class, &filter.classes) {
        return Err(Rejection::Class(event.class.clone()));
    }

    if event.age < filter.min_age {
        return Err(Rejection::Age {
            age: event.age,
            min: filter.min_age,
        });
    }

    let percent = displacement_percent(event);
    if percent < filter.min_distance {
        return Err(Rejection::Distance {
            percent,
            min: filter.min_distance,
        });
    }

    Ok(())
}

pub fn accept(event: &PathEvent, filter: &DeviceFilter) -> bool {
    evaluate(event, filter).is_ok()
}
