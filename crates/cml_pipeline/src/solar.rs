// crates/cml_pipeline/src/solar.rs

//! 日出日落计算
//!
//! NOAA 太阳位置近似公式，精度约 1 分钟，纯函数无 I/O。
//! 日出日落以太阳中心位于地平线下 0.833° 为准（含大气折射与视半径）。

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use cml_geo::Point2D;
use std::f64::consts::PI;

/// 日出日落时太阳天顶角 (度)
const SUNRISE_ZENITH: f64 = 90.833;

/// 某日的昼夜情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SunTimes {
    /// 有日出日落
    Regular {
        /// 日出 (UTC)
        sunrise: DateTime<Utc>,
        /// 日落 (UTC)
        sunset: DateTime<Utc>,
    },
    /// 极昼
    PolarDay,
    /// 极夜
    PolarNight,
}

/// 均时差 (分钟) 与太阳赤纬 (弧度)
fn equation_of_time_and_declination(day_of_year: u32, hour: f64) -> (f64, f64) {
    let g = 2.0 * PI / 365.0 * (day_of_year as f64 - 1.0 + (hour - 12.0) / 24.0);

    let eqtime = 229.18
        * (0.000075 + 0.001868 * g.cos()
            - 0.032077 * g.sin()
            - 0.014615 * (2.0 * g).cos()
            - 0.040849 * (2.0 * g).sin());

    let decl = 0.006918 - 0.399912 * g.cos() + 0.070257 * g.sin()
        - 0.006758 * (2.0 * g).cos()
        + 0.000907 * (2.0 * g).sin()
        - 0.002697 * (3.0 * g).cos()
        + 0.00148 * (3.0 * g).sin();

    (eqtime, decl)
}

/// 指定日期（UTC 日历日）的日出日落
pub fn sun_times(location: &Point2D, date: NaiveDate) -> SunTimes {
    let lat = location.lat().to_radians();
    let (eqtime, decl) = equation_of_time_and_declination(date.ordinal(), 12.0);

    let cos_ha = SUNRISE_ZENITH.to_radians().cos() / (lat.cos() * decl.cos()) - lat.tan() * decl.tan();
    if cos_ha > 1.0 {
        return SunTimes::PolarNight;
    }
    if cos_ha < -1.0 {
        return SunTimes::PolarDay;
    }
    let ha = cos_ha.acos().to_degrees();

    let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    let at_minutes = |m: f64| midnight + Duration::milliseconds((m * 60_000.0).round() as i64);

    SunTimes::Regular {
        sunrise: at_minutes(720.0 - 4.0 * (location.lon() + ha) - eqtime),
        sunset: at_minutes(720.0 - 4.0 * (location.lon() - ha) - eqtime),
    }
}

/// 太阳高度角 (度)
pub fn solar_elevation(location: &Point2D, time: DateTime<Utc>) -> f64 {
    let hour = fractional_hour(&time);
    let (eqtime, decl) = equation_of_time_and_declination(time.ordinal(), hour);

    let true_solar_minutes = hour * 60.0 + eqtime + 4.0 * location.lon();
    let ha = (true_solar_minutes / 4.0 - 180.0).to_radians();
    let lat = location.lat().to_radians();

    let cos_zenith = lat.sin() * decl.sin() + lat.cos() * decl.cos() * ha.cos();
    90.0 - cos_zenith.clamp(-1.0, 1.0).acos().to_degrees()
}

/// 给定时刻在该位置是否处于日出与日落之间
///
/// 以当地平太阳时所在日期计算日出日落，避免跨 UTC 日界时取错日期。
pub fn is_daylight(location: &Point2D, time: DateTime<Utc>) -> bool {
    let solar_local = time + Duration::seconds((location.lon() * 240.0) as i64);
    match sun_times(location, solar_local.date_naive()) {
        SunTimes::Regular { sunrise, sunset } => sunrise <= time && time <= sunset,
        SunTimes::PolarDay => true,
        SunTimes::PolarNight => false,
    }
}

fn fractional_hour(time: &DateTime<Utc>) -> f64 {
    time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prague() -> Point2D {
        Point2D::from_lonlat(14.42, 50.08)
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_prague_summer_solstice() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let SunTimes::Regular { sunrise, sunset } = sun_times(&prague(), date) else {
            panic!("expected regular day");
        };
        // 布拉格夏至：日出约 02:52 UTC，日落约 19:15 UTC
        assert!((sunrise - utc(2024, 6, 21, 2, 52)).num_minutes().abs() <= 5);
        assert!((sunset - utc(2024, 6, 21, 19, 15)).num_minutes().abs() <= 5);
    }

    #[test]
    fn test_prague_winter_solstice() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        let SunTimes::Regular { sunrise, sunset } = sun_times(&prague(), date) else {
            panic!("expected regular day");
        };
        // 日出约 07:00 UTC，日落约 15:02 UTC
        assert!((sunrise - utc(2024, 12, 21, 7, 0)).num_minutes().abs() <= 5);
        assert!((sunset - utc(2024, 12, 21, 15, 2)).num_minutes().abs() <= 5);
    }

    #[test]
    fn test_is_daylight() {
        assert!(is_daylight(&prague(), utc(2024, 6, 21, 12, 0)));
        assert!(!is_daylight(&prague(), utc(2024, 6, 21, 23, 0)));
        assert!(!is_daylight(&prague(), utc(2024, 12, 21, 6, 0)));
        assert!(is_daylight(&prague(), utc(2024, 12, 21, 11, 0)));
    }

    #[test]
    fn test_polar() {
        let svalbard = Point2D::from_lonlat(15.6, 78.2);
        let summer = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let winter = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        assert_eq!(sun_times(&svalbard, summer), SunTimes::PolarDay);
        assert_eq!(sun_times(&svalbard, winter), SunTimes::PolarNight);
        assert!(is_daylight(&svalbard, utc(2024, 6, 21, 0, 0)));
        assert!(!is_daylight(&svalbard, utc(2024, 12, 21, 12, 0)));
    }

    #[test]
    fn test_solar_elevation() {
        // 夏至正午布拉格太阳高度约 63.4°
        let noon = utc(2024, 6, 21, 11, 3);
        let elev = solar_elevation(&prague(), noon);
        assert!((elev - 63.4).abs() < 1.0);
        assert!(solar_elevation(&prague(), utc(2024, 6, 21, 23, 0)) < 0.0);
    }
}
