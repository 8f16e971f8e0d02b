pub(crate) mod distributions;
