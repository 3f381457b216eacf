// Cart, aggregation and checkout
pub mod commerce;

// Request ids, signing and the payment gateway
pub mod payments;

#[cfg(test)]
pub(crate) mod test_support;
