// Price statistics over a normalized hotel list

use crate::models::HotelRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub lowest_price: Option<f64>,
    // No price history exists, so this always mirrors lowest_price
    pub current_price: Option<f64>,
}

pub fn aggregate(hotels: &[HotelRecord]) -> PriceSummary {
    let lowest_price = hotels
        .iter()
        .map(HotelRecord::price)
        .fold(None, |lowest: Option<f64>, price| {
            Some(lowest.map_or(price, |l| l.min(price)))
        });

    PriceSummary {
        lowest_price,
        current_price: lowest_price,
    }
}
