mod decisions;
mod deliveries;
