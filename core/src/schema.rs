//! Fixed column layout of the transactions file and the batch table.
//!
//! RULE: column order here is the column order of the input file.
//! Never reorder; the loader checks headers positionally.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Text,
    Date,
    Decimal,
    SmallInt,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Decimal | FieldKind::SmallInt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    RowId,
    OrderId,
    OrderDate,
    ShipDate,
    ShipMode,
    CustomerId,
    CustomerName,
    Segment,
    City,
    State,
    Country,
    Market,
    Region,
    ProductId,
    Category,
    SubCategory,
    ProductName,
    Sales,
    Quantity,
    Discount,
    Profit,
    ShippingCost,
    OrderPriority,
}

impl Field {
    /// Every field, in file order.
    pub const ALL: [Field; 23] = [
        Field::RowId,
        Field::OrderId,
        Field::OrderDate,
        Field::ShipDate,
        Field::ShipMode,
        Field::CustomerId,
        Field::CustomerName,
        Field::Segment,
        Field::City,
        Field::State,
        Field::Country,
        Field::Market,
        Field::Region,
        Field::ProductId,
        Field::Category,
        Field::SubCategory,
        Field::ProductName,
        Field::Sales,
        Field::Quantity,
        Field::Discount,
        Field::Profit,
        Field::ShippingCost,
        Field::OrderPriority,
    ];

    /// Column name in the `transactions` table.
    pub fn column(self) -> &'static str {
        match self {
            Field::RowId         => "row_id",
            Field::OrderId       => "order_id",
            Field::OrderDate     => "order_date",
            Field::ShipDate      => "ship_date",
            Field::ShipMode      => "ship_mode",
            Field::CustomerId    => "customer_id",
            Field::CustomerName  => "customer_name",
            Field::Segment       => "segment",
            Field::City          => "city",
            Field::State         => "state",
            Field::Country       => "country",
            Field::Market        => "market",
            Field::Region        => "region",
            Field::ProductId     => "product_id",
            Field::Category      => "category",
            Field::SubCategory   => "sub_category",
            Field::ProductName   => "product_name",
            Field::Sales         => "sales",
            Field::Quantity      => "quantity",
            Field::Discount      => "discount",
            Field::Profit        => "profit",
            Field::ShippingCost  => "shipping_cost",
            Field::OrderPriority => "order_priority",
        }
    }

    /// Header text expected in the input file.
    pub fn header(self) -> &'static str {
        match self {
            Field::RowId         => "Row ID",
            Field::OrderId       => "Order ID",
            Field::OrderDate     => "Order Date",
            Field::ShipDate      => "Ship Date",
            Field::ShipMode      => "Ship Mode",
            Field::CustomerId    => "Customer ID",
            Field::CustomerName  => "Customer Name",
            Field::Segment       => "Segment",
            Field::City          => "City",
            Field::State         => "State",
            Field::Country       => "Country",
            Field::Market        => "Market",
            Field::Region        => "Region",
            Field::ProductId     => "Product ID",
            Field::Category      => "Category",
            Field::SubCategory   => "Sub-Category",
            Field::ProductName   => "Product Name",
            Field::Sales         => "Sales",
            Field::Quantity      => "Quantity",
            Field::Discount      => "Discount",
            Field::Profit        => "Profit",
            Field::ShippingCost  => "Shipping Cost",
            Field::OrderPriority => "Order Priority",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::RowId => FieldKind::Integer,
            Field::OrderDate | Field::ShipDate => FieldKind::Date,
            Field::Sales | Field::Discount | Field::Profit | Field::ShippingCost => {
                FieldKind::Decimal
            }
            Field::Quantity => FieldKind::SmallInt,
            _ => FieldKind::Text,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.kind().is_numeric()
    }

    pub fn from_column(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.column() == name)
    }

    /// Header comparison ignores case and surrounding whitespace.
    pub fn matches_header(self, header: &str) -> bool {
        self.header().eq_ignore_ascii_case(header.trim())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_round_trip_through_lookup() {
        for field in Field::ALL {
            assert_eq!(Field::from_column(field.column()), Some(field));
        }
    }

    #[test]
    fn measures_are_numeric_and_identifiers_are_not() {
        assert!(Field::Sales.is_numeric());
        assert!(Field::Quantity.is_numeric());
        assert!(!Field::OrderId.is_numeric());
        assert!(!Field::OrderDate.is_numeric());
    }
}
