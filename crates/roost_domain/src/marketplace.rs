//! Marketplace listings and orders.

use roost_core::{Entity, ValidationError};
use serde::{Deserialize, Serialize};

/// What a listing sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingCategory {
    /// Live birds.
    #[default]
    LiveBirds,
    /// Table or hatching eggs.
    Eggs,
    /// Day-old chicks.
    Chicks,
    /// Feed and supplements.
    Feed,
    /// Equipment.
    Equipment,
}

/// Lifecycle of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    /// Visible to buyers.
    #[default]
    Active,
    /// Everything sold.
    SoldOut,
    /// Withdrawn by the seller.
    Inactive,
}

/// A product offered by a seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListing {
    /// Selling user.
    pub seller_id: String,
    /// Headline.
    pub title: String,
    /// Free text description.
    #[serde(default)]
    pub description: String,
    /// Category.
    #[serde(default)]
    pub category: ListingCategory,
    /// Breed, for bird listings.
    #[serde(default)]
    pub breed: Option<String>,
    /// Age of the birds in weeks.
    #[serde(default)]
    pub age_in_weeks: Option<u32>,
    /// Unit price in minor currency units.
    pub price_cents: u64,
    /// Units still for sale.
    pub quantity_available: u32,
    /// Uploaded image locations.
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Listing status.
    #[serde(default)]
    pub status: ListingStatus,
}

impl ProductListing {
    /// Creates an active listing.
    pub fn new(
        seller_id: impl Into<String>,
        title: impl Into<String>,
        price_cents: u64,
        quantity_available: u32,
    ) -> Self {
        Self {
            seller_id: seller_id.into(),
            title: title.into(),
            description: String::new(),
            category: ListingCategory::default(),
            breed: None,
            age_in_weeks: None,
            price_cents,
            quantity_available,
            image_urls: Vec::new(),
            status: ListingStatus::Active,
        }
    }
}

impl Entity for ProductListing {
    const ENTITY_TYPE: &'static str = "product_listing";

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("seller_id", &self.seller_id)?;
        ValidationError::require("title", &self.title)?;
        if self.price_cents == 0 {
            return Err(ValidationError::new("price_cents", "must be positive"));
        }
        if self.status == ListingStatus::Active && self.quantity_available == 0 {
            return Err(ValidationError::new(
                "quantity_available",
                "must be positive for an active listing",
            ));
        }
        Ok(())
    }
}

/// Where an order is in fulfilment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, not yet confirmed by the seller.
    #[default]
    Pending,
    /// Accepted by the seller.
    Confirmed,
    /// Handed over to delivery.
    Shipped,
    /// Received by the buyer.
    Delivered,
    /// Called off.
    Cancelled,
}

/// A purchase of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Buying user.
    pub buyer_id: String,
    /// Selling user.
    pub seller_id: String,
    /// Listing bought.
    pub listing_id: String,
    /// Units ordered.
    pub quantity: u32,
    /// Unit price at order time, in minor currency units.
    pub unit_price_cents: u64,
    /// Fulfilment status.
    #[serde(default)]
    pub status: OrderStatus,
    /// Delivery notes.
    #[serde(default)]
    pub notes: String,
    /// Reason given when cancelled.
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl Order {
    /// Creates a pending order.
    pub fn new(
        buyer_id: impl Into<String>,
        listing: &ProductListing,
        listing_id: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            seller_id: listing.seller_id.clone(),
            listing_id: listing_id.into(),
            quantity,
            unit_price_cents: listing.price_cents,
            status: OrderStatus::Pending,
            notes: String::new(),
            cancellation_reason: None,
        }
    }

    /// Total price, saturating on overflow.
    pub fn total_cents(&self) -> u64 {
        self.unit_price_cents.saturating_mul(u64::from(self.quantity))
    }
}

impl Entity for Order {
    const ENTITY_TYPE: &'static str = "order";

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::require("buyer_id", &self.buyer_id)?;
        ValidationError::require("seller_id", &self.seller_id)?;
        ValidationError::require("listing_id", &self.listing_id)?;
        if self.quantity == 0 {
            return Err(ValidationError::new("quantity", "must be positive"));
        }
        if self.status == OrderStatus::Cancelled {
            ValidationError::require_some(
                "cancellation_reason",
                self.cancellation_reason.as_deref(),
            )?;
        }
        Ok(())
    }
}
