//! Core value types: timestamps, workflow statuses and adjustment sources
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn parse_rfc3339(text: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| TimeStamp(dt.with_timezone(&Utc)))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

// history records carry nanosecond timestamps
impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

// entities carry RFC 3339 text
impl Serialize for TimeStamp<Utc> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TimeStamp<Utc> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        DateTime::<Utc>::deserialize(deserializer).map(TimeStamp)
    }
}

/// Progress of one participant on one ticket.
///
/// Movement is strictly sequential (`n -> n + 1`) except for `Closed`,
/// which any order can be forced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OrderStatus {
    Closed = 0,
    Applied = 1,
    Confirmed = 2,
    Done = 3,
    Awarded = 4,
}

impl OrderStatus {
    /// The only status an order may advance from to reach `self`.
    pub fn predecessor(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Closed | OrderStatus::Applied => None,
            OrderStatus::Confirmed => Some(OrderStatus::Applied),
            OrderStatus::Done => Some(OrderStatus::Confirmed),
            OrderStatus::Awarded => Some(OrderStatus::Done),
        }
    }
}

impl From<OrderStatus> for u8 {
    fn from(status: OrderStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OrderStatus::Closed),
            1 => Ok(OrderStatus::Applied),
            2 => Ok(OrderStatus::Confirmed),
            3 => Ok(OrderStatus::Done),
            4 => Ok(OrderStatus::Awarded),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// Ticket status, always the highest status among the ticket's orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TicketStatus {
    Created = 0,
    Applied = 1,
    Ongoing = 2,
    Done = 3,
    Awarded = 4,
}

impl From<OrderStatus> for TicketStatus {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Closed => TicketStatus::Created,
            OrderStatus::Applied => TicketStatus::Applied,
            OrderStatus::Confirmed => TicketStatus::Ongoing,
            OrderStatus::Done => TicketStatus::Done,
            OrderStatus::Awarded => TicketStatus::Awarded,
        }
    }
}

impl From<TicketStatus> for u8 {
    fn from(status: TicketStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for TicketStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        OrderStatus::try_from(value)
            .map(TicketStatus::from)
            .map_err(|_| format!("unknown ticket status {value}"))
    }
}

pub const MANUAL_ADJUSTMENT_MARKER: &str = "ManualAdd";

/// Why a credit balance changed. Stored in `Credit.ticketIDs` as text:
/// the ticket id in decimal, or [`MANUAL_ADJUSTMENT_MARKER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AdjustmentSource {
    ManualAdjustment,
    TicketAward(u64),
}

impl AdjustmentSource {
    pub fn ticket_id(&self) -> Option<u64> {
        match self {
            AdjustmentSource::ManualAdjustment => None,
            AdjustmentSource::TicketAward(id) => Some(*id),
        }
    }
}

impl fmt::Display for AdjustmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjustmentSource::ManualAdjustment => f.write_str(MANUAL_ADJUSTMENT_MARKER),
            AdjustmentSource::TicketAward(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for AdjustmentSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == MANUAL_ADJUSTMENT_MARKER {
            return Ok(AdjustmentSource::ManualAdjustment);
        }
        s.parse::<u64>()
            .map(AdjustmentSource::TicketAward)
            .map_err(|_| format!("'{s}' is neither a ticket id nor {MANUAL_ADJUSTMENT_MARKER}"))
    }
}

impl From<AdjustmentSource> for String {
    fn from(source: AdjustmentSource) -> String {
        source.to_string()
    }
}

impl TryFrom<String> for AdjustmentSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
