//! Sampling-grid derivation for the dispersion model.
//!
//! A grid is resolved from, in priority order: explicit user-defined
//! fields, a boundary+spacing block, an auto-computed square around a
//! single fire, or a grid embedded in meteorological metadata.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{BoundaryConfig, DispersionConfig, GridConfig, Projection};
use crate::error::{Result, SmokeError};
use crate::fires::record::FireRecord;

pub const KM_PER_DEG_LAT: f64 = 111.0;
pub const DEG_LAT_PER_KM: f64 = 1.0 / KM_PER_DEG_LAT;
pub const KM_PER_DEG_LNG_AT_EQUATOR: f64 = 111.32;

/// Kilometers per degree of longitude at the given latitude.
pub fn km_per_deg_lng(lat: f64) -> f64 {
    KM_PER_DEG_LNG_AT_EQUATOR * lat.to_radians().cos()
}

/// Concrete sampling grid: center, extent and cell spacing, all in
/// degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub height_latitude: f64,
    pub width_longitude: f64,
    pub spacing_latitude: f64,
    pub spacing_longitude: f64,
}

impl GridParams {
    pub fn validate(&self) -> Result<()> {
        if self.spacing_latitude <= 0.0 || self.spacing_longitude <= 0.0 {
            return Err(SmokeError::Config(
                "grid spacing values must be positive".to_string(),
            ));
        }
        if self.height_latitude <= 0.0 || self.width_longitude <= 0.0 {
            return Err(SmokeError::Config(
                "grid extent values must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Grid-relevant subset of meteorological metadata. Used both as a
/// fallback source of spacing/boundary values and, at the lowest
/// priority, as a grid definition of its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetInfo {
    pub projection: Option<Projection>,
    pub spacing: Option<f64>,
    pub boundary: Option<BoundaryConfig>,
    pub grid: Option<GridConfig>,
}

/// Square grid of side `length` km centered on a point.
///
/// Spacing is given in km unless `spacing_in_degrees`; km values are
/// converted using the latitude-adjusted km-per-degree-longitude at the
/// center point.
pub fn square_grid_from_lat_lng(
    lat: f64,
    lng: f64,
    spacing_latitude: f64,
    spacing_longitude: f64,
    length: f64,
    spacing_in_degrees: bool,
) -> Result<GridParams> {
    debug!(
        lat,
        lng,
        length,
        spacing_latitude,
        spacing_longitude,
        in_degrees = spacing_in_degrees,
        "calculating square grid"
    );
    if length <= 0.0 {
        return Err(SmokeError::Config(
            "grid_length must be positive".to_string(),
        ));
    }
    let k_p_lng = km_per_deg_lng(lat);
    let (mut spacing_latitude, mut spacing_longitude) = (spacing_latitude, spacing_longitude);
    if !spacing_in_degrees {
        spacing_latitude /= KM_PER_DEG_LAT;
        spacing_longitude /= k_p_lng;
    }
    let params = GridParams {
        center_latitude: lat,
        center_longitude: lng,
        height_latitude: DEG_LAT_PER_KM * length,
        width_longitude: length / k_p_lng,
        spacing_latitude,
        spacing_longitude,
    };
    params.validate()?;
    Ok(params)
}

/// Grid parameters from a boundary+spacing block, with missing values
/// falling back to the met metadata.
///
/// Boundaries spanning the antimeridian are not supported; a southwest
/// corner at or beyond the northeast corner in either axis is rejected.
pub fn grid_params_from_grid(grid: &GridConfig, met_info: Option<&MetInfo>) -> Result<GridParams> {
    info!("calculating grid parameters from boundary and spacing");

    let spacing = grid
        .spacing
        .or_else(|| met_info.and_then(|m| m.spacing))
        .ok_or_else(|| {
            SmokeError::Config(
                "grid spacing must be defined in the grid config or met metadata".to_string(),
            )
        })?;
    let boundary = grid
        .boundary
        .or_else(|| met_info.and_then(|m| m.boundary))
        .ok_or_else(|| {
            SmokeError::Config(
                "grid boundary must be defined in the grid config or met metadata".to_string(),
            )
        })?;

    if boundary.sw.lng >= boundary.ne.lng {
        return Err(SmokeError::Config(
            "grid boundaries spanning the antimeridian or with zero width are not supported"
                .to_string(),
        ));
    }
    if boundary.sw.lat >= boundary.ne.lat {
        return Err(SmokeError::Config(
            "grid boundary SW latitude must be less than NE latitude".to_string(),
        ));
    }

    let center_latitude = (boundary.sw.lat + boundary.ne.lat) / 2.0;
    let center_longitude = (boundary.sw.lng + boundary.ne.lng) / 2.0;
    let projection = grid.projection.or_else(|| met_info.and_then(|m| m.projection));
    let spacing_deg = if matches!(projection, Some(Projection::LatLon)) {
        spacing
    } else {
        spacing / km_per_deg_lng(center_latitude)
    };

    let params = GridParams {
        center_latitude,
        center_longitude,
        height_latitude: boundary.ne.lat - boundary.sw.lat,
        width_longitude: boundary.ne.lng - boundary.sw.lng,
        spacing_latitude: spacing_deg,
        spacing_longitude: spacing_deg,
    };
    params.validate()?;
    Ok(params)
}

/// Resolves the sampling grid, trying sources in fixed priority order;
/// the first applicable source wins.
///
/// Returns `Ok(None)` only when no source applies and the caller
/// explicitly allows an undefined grid.
pub fn get_grid_params(
    config: &DispersionConfig,
    met_info: Option<&MetInfo>,
    fires: &[FireRecord],
    allow_undefined: bool,
) -> Result<Option<GridParams>> {
    let params = if let Some(user_grid) = &config.user_defined_grid {
        info!("user-defined sampling grid invoked");
        let mut params = GridParams {
            center_latitude: user_grid.center_latitude,
            center_longitude: user_grid.center_longitude,
            height_latitude: user_grid.height_latitude,
            width_longitude: user_grid.width_longitude,
            spacing_latitude: user_grid.spacing_latitude,
            spacing_longitude: user_grid.spacing_longitude,
        };
        if !config.projection.spacing_in_degrees() {
            params.spacing_longitude /= km_per_deg_lng(params.center_latitude);
            params.spacing_latitude /= KM_PER_DEG_LAT;
        }
        params.validate()?;
        params
    } else if let Some(grid) = &config.grid {
        grid_params_from_grid(grid, met_info)?
    } else if config.compute_grid {
        if fires.len() != 1 {
            return Err(SmokeError::Validation(
                "grid computation from fire location is only supported for single-fire runs"
                    .to_string(),
            ));
        }
        let (Some(spacing_latitude), Some(spacing_longitude)) =
            (config.spacing_latitude, config.spacing_longitude)
        else {
            return Err(SmokeError::Config(
                "spacing_latitude and spacing_longitude are required to compute the grid"
                    .to_string(),
            ));
        };
        let length = config.grid_length.ok_or_else(|| {
            SmokeError::Config("grid_length is required to compute the grid".to_string())
        })?;
        square_grid_from_lat_lng(
            fires[0].latitude()?,
            fires[0].longitude()?,
            spacing_latitude,
            spacing_longitude,
            length,
            config.projection.spacing_in_degrees(),
        )?
    } else if let Some(met_grid) = met_info.and_then(|m| m.grid.as_ref()) {
        grid_params_from_grid(met_grid, met_info)?
    } else if allow_undefined {
        return Ok(None);
    } else {
        return Err(SmokeError::Config(
            "specify a dispersion grid".to_string(),
        ));
    };

    debug!(?params, "resolved grid parameters");
    Ok(Some(params))
}
