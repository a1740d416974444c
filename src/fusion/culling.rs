use log::debug;

use crate::types::Location;

/// Two coverage areas are compatible when their circles touch or overlap
fn compatible(a: &Location, b: &Location) -> bool {
    a.distance_to(b) - a.accuracy - b.accuracy <= 0.0
}

/// Greedy pairwise grouping of emitter locations
///
/// Every location seeds its own bin; each location is then added to every bin
/// whose current members it is compatible with. Bins hold indices into
/// `locations` and may overlap.
fn divide_in_groups(locations: &[Location]) -> Vec<Vec<usize>> {
    let mut bins: Vec<Vec<usize>> = (0..locations.len()).map(|i| vec![i]).collect();

    for (i, loc) in locations.iter().enumerate() {
        for bin in bins.iter_mut() {
            if bin.contains(&i) {
                continue;
            }
            if bin.iter().all(|&j| compatible(loc, &locations[j])) {
                bin.push(i);
            }
        }
    }
    bins
}

/// Drop locations that disagree with the largest mutually compatible group
///
/// # Returns
/// The largest group, if it holds at least as many locations as the smallest
/// `min_count` among its members requires; `None` otherwise (including for
/// empty input).
pub fn cull_outliers(locations: &[Location]) -> Option<Vec<Location>> {
    let bins = divide_in_groups(locations);

    // First of the largest bins wins ties
    let best = bins
        .iter()
        .fold(None::<&Vec<usize>>, |best, bin| match best {
            Some(b) if b.len() >= bin.len() => Some(b),
            _ => Some(bin),
        })?;

    let required = best
        .iter()
        .filter_map(|&i| locations[i].extras.min_count)
        .min()
        .unwrap_or(u32::MAX);

    debug!(
        "Largest of {} groups has {} members, {} required",
        bins.len(),
        best.len(),
        required
    );
    if best.len() as u64 >= required as u64 {
        Some(best.iter().map(|&i| locations[i].clone()).collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provider;

    fn wlan_loc(lat: f64, lon: f64, acc: f64) -> Location {
        let mut loc = Location::new(lat, lon, acc, 0, Provider::Emitter).unwrap();
        loc.extras.min_count = Some(2);
        loc.extras.asu = Some(15);
        loc
    }

    #[test]
    fn test_far_outlier_removed() {
        let locs = vec![
            wlan_loc(10.0, 10.0, 65.0),
            wlan_loc(10.0001, 10.0001, 65.0),
            wlan_loc(50.0, 50.0, 65.0),
        ];
        let kept = cull_outliers(&locs).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|l| l.latitude < 11.0));
    }

    #[test]
    fn test_single_wlan_below_min_count() {
        assert!(cull_outliers(&[wlan_loc(10.0, 10.0, 65.0)]).is_none());
    }

    #[test]
    fn test_single_tower_is_enough() {
        let mut tower = wlan_loc(10.0, 10.0, 2000.0);
        tower.extras.min_count = Some(1);
        let kept = cull_outliers(&[tower]).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_mixed_group_uses_smallest_min_count() {
        let mut tower = wlan_loc(10.0, 10.0, 2000.0);
        tower.extras.min_count = Some(1);
        let locs = vec![wlan_loc(50.0, 50.0, 65.0), tower];
        // Two disjoint singleton bins; the first wins the tie but needs two members
        assert!(cull_outliers(&locs).is_none());
    }

    #[test]
    fn test_empty_input() {
        assert!(cull_outliers(&[]).is_none());
    }

    #[test]
    fn test_touching_circles_are_compatible() {
        // ~111 m apart at the equator-ish latitude, radii 60 m each
        let a = wlan_loc(1.0, 1.0, 60.0);
        let b = wlan_loc(1.001, 1.0, 60.0);
        assert!(compatible(&a, &b));
        let c = wlan_loc(1.0, 1.0, 50.0);
        let d = wlan_loc(1.001, 1.0, 50.0);
        assert!(!compatible(&c, &d));
    }

    #[test]
    fn test_chain_is_not_transitive() {
        // a-b and b-c compatible, a-c not
        let a = wlan_loc(1.0, 1.0, 60.0);
        let b = wlan_loc(1.001, 1.0, 60.0);
        let c = wlan_loc(1.002, 1.0, 60.0);
        let kept = cull_outliers(&[a, b, c]).unwrap();
        assert_eq!(kept.len(), 2);
    }
}
