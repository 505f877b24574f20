// Forza Haptics Bridge - Forza telemetry to controller rumble and impulse triggers
//
// Listens for Forza "Data Out" UDP packets, derives slip, engine load and
// collision metrics from them, and shapes the game's rumble requests into
// motor and trigger intensities.

pub mod common;
