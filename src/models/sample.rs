//! Orders and customers are not persisted; the dashboard reads this fixed
//! data set.

use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Serialize, Clone)]
pub struct OrderCustomer {
    pub name: &'static str,
    pub email: &'static str,
}

#[derive(Debug, Serialize, Clone)]
pub struct Order {
    pub id: &'static str,
    pub customer: OrderCustomer,
    pub date: &'static str,
    pub status: OrderStatus,
    pub total: f64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: &'static str,
    pub name: &'static str,
    pub email: &'static str,
    pub total_spent: f64,
    pub orders: u32,
}

const CUSTOMERS: [(&str, &str, &str); 5] = [
    ("CUST001", "Liam Johnson", "liam@example.com"),
    ("CUST002", "Olivia Smith", "olivia@example.com"),
    ("CUST003", "Noah Williams", "noah@example.com"),
    ("CUST004", "Emma Brown", "emma@example.com"),
    ("CUST005", "Ava Jones", "ava@example.com"),
];

const ORDERS: [(&str, usize, &str, OrderStatus, f64); 8] = [
    ("ORD001", 0, "2023-06-23", OrderStatus::Delivered, 250.00),
    ("ORD002", 1, "2023-06-24", OrderStatus::Processing, 150.75),
    ("ORD003", 2, "2023-06-25", OrderStatus::Shipped, 350.00),
    ("ORD004", 3, "2023-06-26", OrderStatus::Delivered, 450.50),
    ("ORD005", 4, "2023-06-27", OrderStatus::Cancelled, 550.00),
    ("ORD006", 0, "2023-07-02", OrderStatus::Shipped, 89.99),
    ("ORD007", 2, "2023-07-05", OrderStatus::Processing, 120.25),
    ("ORD008", 3, "2023-07-09", OrderStatus::Delivered, 42.00),
];

pub fn orders() -> Vec<Order> {
    ORDERS
        .iter()
        .filter_map(|&(id, customer, date, status, total)| {
            let &(_, name, email) = CUSTOMERS.get(customer)?;
            Some(Order {
                id,
                customer: OrderCustomer { name, email },
                date,
                status,
                total,
            })
        })
        .collect()
}

/// Customer totals are aggregated from the non-cancelled sample orders.
pub fn customers() -> Vec<Customer> {
    CUSTOMERS
        .iter()
        .enumerate()
        .map(|(index, &(id, name, email))| {
            let placed = ORDERS
                .iter()
                .filter(|order| order.1 == index && order.3 != OrderStatus::Cancelled);
            let (count, total) = placed.fold((0u32, 0.0f64), |(n, sum), order| (n + 1, sum + order.4));
            Customer {
                id,
                name,
                email,
                total_spent: (total * 100.0).round() / 100.0,
                orders: count,
            }
        })
        .collect()
}
