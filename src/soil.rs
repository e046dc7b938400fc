//! Derivación de pH y NPK a partir de latitud, longitud y lluvia anual.
//!
//! Las bandas de latitud y sus rangos son el contrato; cómo se elige un valor
//! dentro del rango depende del modelo (`HeuristicSoilModel` o
//! `RandomizedSoilModel`).

use std::f64::consts::PI;
use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::models::{round2, SoilSummary, SoilType, WeatherSummary};

/// Estrategia de derivación de suelo. Sustituible por una consulta real a
/// una malla edafológica sin tocar el orquestador.
pub trait SoilModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn derive(&self, latitude: f64, longitude: f64, weather: &WeatherSummary) -> SoilSummary;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatitudeBand {
    /// `|lat| < 23°`
    Tropical,
    /// `23° <= |lat| < 50°`
    Temperate,
    /// `|lat| >= 50°` (y latitudes no numéricas)
    Cold,
}

#[derive(Debug, Clone, Copy)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    #[cfg(test)]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Punto en el rango para `t` en `[0, 1)`.
    fn lerp(&self, t: f64) -> f64 {
        self.min + t * (self.max - self.min)
    }
}

/// Rangos y tipos de suelo candidatos de una banda.
///
/// `soil_types` va del más húmedo al más seco. `rainfall_thresholds[i]` es la
/// lluvia mínima (mm/año) para elegir `soil_types[i]`; `draw_cutoffs[i]` es el
/// umbral del sorteo para el mismo candidato. El último candidato no tiene
/// umbral y se usa si ninguno se cumple.
#[derive(Debug)]
pub struct BandProfile {
    pub soil_types: &'static [SoilType],
    pub rainfall_thresholds: &'static [f64],
    pub draw_cutoffs: &'static [f64],
    pub ph: ValueRange,
    pub nitrogen: ValueRange,
    pub phosphorus: ValueRange,
    pub potassium: ValueRange,
}

static TROPICAL: BandProfile = BandProfile {
    soil_types: &[SoilType::Clay, SoilType::Loamy],
    rainfall_thresholds: &[1000.0],
    draw_cutoffs: &[0.5],
    ph: ValueRange::new(5.5, 7.0),
    nitrogen: ValueRange::new(15.0, 35.0),
    phosphorus: ValueRange::new(10.0, 25.0),
    potassium: ValueRange::new(100.0, 180.0),
};

static TEMPERATE: BandProfile = BandProfile {
    soil_types: &[SoilType::Loamy, SoilType::Silty, SoilType::Sandy],
    rainfall_thresholds: &[800.0, 400.0],
    draw_cutoffs: &[0.6, 0.5],
    ph: ValueRange::new(6.0, 8.0),
    nitrogen: ValueRange::new(25.0, 55.0),
    phosphorus: ValueRange::new(15.0, 40.0),
    potassium: ValueRange::new(150.0, 250.0),
};

static COLD: BandProfile = BandProfile {
    soil_types: &[SoilType::Silty, SoilType::Sandy],
    rainfall_thresholds: &[500.0],
    draw_cutoffs: &[0.5],
    ph: ValueRange::new(5.0, 6.5),
    nitrogen: ValueRange::new(10.0, 25.0),
    phosphorus: ValueRange::new(8.0, 20.0),
    potassium: ValueRange::new(80.0, 140.0),
};

impl BandProfile {
    /// Primer candidato cuyo umbral de lluvia se alcanza. Una lluvia no
    /// numérica no alcanza ninguno.
    fn soil_type_for_rainfall(&self, rainfall_mm: f64) -> SoilType {
        self.rainfall_thresholds
            .iter()
            .position(|min| rainfall_mm >= *min)
            .map_or_else(|| self.last_soil_type(), |i| self.soil_types[i])
    }

    /// Un sorteo por candidato, en orden, hasta que uno supera su umbral.
    fn draw_soil_type(&self, rng: &mut StdRng) -> SoilType {
        self.draw_cutoffs
            .iter()
            .position(|cutoff| rng.gen::<f64>() > *cutoff)
            .map_or_else(|| self.last_soil_type(), |i| self.soil_types[i])
    }

    fn last_soil_type(&self) -> SoilType {
        self.soil_types[self.soil_types.len() - 1]
    }
}

impl LatitudeBand {
    pub fn from_latitude(latitude: f64) -> Self {
        let abs_lat = latitude.abs();
        if abs_lat < 23.0 {
            Self::Tropical
        } else if abs_lat < 50.0 {
            Self::Temperate
        } else {
            Self::Cold
        }
    }

    pub fn profile(&self) -> &'static BandProfile {
        match self {
            Self::Tropical => &TROPICAL,
            Self::Temperate => &TEMPERATE,
            Self::Cold => &COLD,
        }
    }
}

/// Valores base antes de aplicar lluvia y longitud.
#[derive(Debug, Clone, Copy)]
struct BaseValues {
    soil_type: SoilType,
    ph: f64,
    nitrogen: f64,
    phosphorus: f64,
    potassium: f64,
}

/// Factor multiplicativo de nitrógeno: más lluvia, más nitrógeno.
pub fn rainfall_factor(avg_annual_rainfall_mm: f64) -> f64 {
    0.8 + 0.4 * (avg_annual_rainfall_mm / 1000.0)
}

/// Perturbación suave por longitud, para que longitudes cercanas no den
/// resultados idénticos.
pub fn longitude_phase(longitude: f64) -> f64 {
    (longitude * PI / 180.0).sin() * 0.2
}

fn finish(base: BaseValues, longitude: f64, weather: &WeatherSummary) -> SoilSummary {
    let nitrogen = base.nitrogen * rainfall_factor(weather.avg_annual_rainfall_mm);
    let phase = longitude_phase(longitude);

    SoilSummary {
        ph: round2(base.ph + phase),
        nitrogen_mg_kg: round2(nitrogen),
        phosphorus_mg_kg: round2(base.phosphorus + phase * 5.0),
        potassium_mg_kg: round2(base.potassium),
        soil_type: Some(base.soil_type),
    }
}

/// Modelo determinista: punto medio de cada rango y tipo de suelo por
/// umbrales de lluvia dentro de los candidatos de la banda.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicSoilModel;

impl SoilModel for HeuristicSoilModel {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn derive(&self, latitude: f64, longitude: f64, weather: &WeatherSummary) -> SoilSummary {
        let profile = LatitudeBand::from_latitude(latitude).profile();
        let base = BaseValues {
            soil_type: profile.soil_type_for_rainfall(weather.avg_annual_rainfall_mm),
            ph: profile.ph.midpoint(),
            nitrogen: profile.nitrogen.midpoint(),
            phosphorus: profile.phosphorus.midpoint(),
            potassium: profile.potassium.midpoint(),
        };
        finish(base, longitude, weather)
    }
}

/// Sorteo uniforme dentro de los rangos de la banda.
pub struct RandomizedSoilModel {
    rng: Mutex<StdRng>,
}

impl RandomizedSoilModel {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl SoilModel for RandomizedSoilModel {
    fn name(&self) -> &'static str {
        "randomized"
    }

    fn derive(&self, latitude: f64, longitude: f64, weather: &WeatherSummary) -> SoilSummary {
        let profile = LatitudeBand::from_latitude(latitude).profile();
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let base = BaseValues {
            soil_type: profile.draw_soil_type(&mut rng),
            ph: profile.ph.lerp(rng.gen()),
            nitrogen: profile.nitrogen.lerp(rng.gen()),
            phosphorus: profile.phosphorus.lerp(rng.gen()),
            potassium: profile.potassium.lerp(rng.gen()),
        };
        drop(rng);
        finish(base, longitude, weather)
    }
}
