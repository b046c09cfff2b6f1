//! GHCNh station metadata and its spatial indexing with `rstar`.

use rstar::{PointDistance, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// One entry of the GHCNh station list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GhcnhStation {
    /// 11 character GHCN identifier; the first two characters are the FIPS country code
    /// (e.g. "SF" for South Africa).
    pub id: String,
    pub name: Option<String>,
    pub location: Location,
}

impl GhcnhStation {
    pub fn country_code(&self) -> &str {
        self.id.get(..2).unwrap_or(&self.id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Location {
    /// Decimal degrees, positive north.
    pub latitude: f64,
    /// Decimal degrees, positive east.
    pub longitude: f64,
    /// Metres above sea level.
    pub elevation: Option<f64>,
}

impl RTreeObject for GhcnhStation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.latitude, self.location.longitude])
    }
}

/// Squared planar distance in degrees. Only used to order R-tree candidates; real distances
/// are haversine.
impl PointDistance for GhcnhStation {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.location.latitude - point[0];
        let dlon = self.location.longitude - point[1];
        dlat * dlat + dlon * dlon
    }
}
