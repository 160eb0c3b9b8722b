use crate::hub::HubObserver;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

pub const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name,route_desc,route_type,route_url,route_color,route_text_color
0,RTD,0,Broadway,This Route Travels Northbound & Southbound,3,https://www.rtd-denver.com/app/route/0/schedule,0076CE,FFFFFF
101E,RTD,E,Ridgegate Line,,0,https://www.rtd-denver.com/app/route/E/schedule,552683,FFFFFF
";

pub const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign,direction_id,block_id,shape_id
0,DPSWK,113279870,Union Station,1, 0  5,1339658
101E,DPSWK,113279999,Ridgegate,0,E 1,1339700
";

pub const SHAPES: &str = "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence,shape_dist_traveled
1339658,39.7150,-104.9873,2,0.41
1339658,39.7120,-104.9875,1,0
1339700,39.5600,-104.8700,1,
";

pub const STOPS: &str = "stop_id,stop_code,stop_name,stop_desc,stop_lat,stop_lon,zone_id,stop_url,location_type,parent_station,stop_timezone,wheelchair_boarding
S1,10001,Broadway & 1st Ave,Vehicles Travelling North,40.0,-105.0,,,0,,America/Denver,1
S2,10002,Broadway & 3rd Ave,Vehicles Travelling North,40.1,-105.1,,,0,,America/Denver,1
";

pub const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence,stop_headsign,pickup_type,drop_off_type,shape_dist_traveled,timepoint
113279870,05:02:00,05:02:00,S2,2,,0,0,0.41,0
113279870,05:00:00,05:00:00,S1,1,,0,0,,1
113279999,06:00:00,06:00:00,S1,1,,0,0,,1
";

pub fn write_tables(dir: &Path) {
    fs::write(dir.join("routes.txt"), ROUTES).unwrap();
    fs::write(dir.join("trips.txt"), TRIPS).unwrap();
    fs::write(dir.join("shapes.txt"), SHAPES).unwrap();
    fs::write(dir.join("stops.txt"), STOPS).unwrap();
    fs::write(dir.join("stop_times.txt"), STOP_TIMES).unwrap();
}

/// Observer that keeps every hook call for later assertions.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<(&'static str, String, String)>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<(&'static str, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, hook: &'static str, sender: &str, data: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((hook, sender.to_string(), data.to_string()));
    }
}

impl HubObserver for Recorder {
    fn on_connect(&self, sender: &str, data: &str) {
        self.push("connect", sender, data);
    }

    fn on_disconnect(&self, sender: &str, data: &str) {
        self.push("disconnect", sender, data);
    }

    fn on_announcement(&self, sender: &str, data: &str) {
        self.push("announcement", sender, data);
    }
}
